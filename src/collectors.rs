// Stats Collectors - sinks for per-window snapshots
// Collectors run inline on the aggregation path, so they must return quickly.
// Any per-run formatting state lives inside the collector instance.

use anyhow::{anyhow, Result};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::stats::Stats;

/// Consumes stats snapshots, once per group per window, in emission order
pub trait StatsCollector: Send {
    fn accept(&mut self, stats: &Stats) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &'static str {
        "collector"
    }
}

fn format_millis(duration: Duration) -> String {
    format!("{:.3}ms", duration.as_micros() as f64 / 1000.0)
}

/// One JSON document per line
pub struct JsonLinesCollector<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesCollector<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesCollector<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> StatsCollector for JsonLinesCollector<W> {
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        serde_json::to_writer(&mut self.writer, stats)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// `group, executions, p50, p95, p99, max` rows
pub struct CsvCollector<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> CsvCollector<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl CsvCollector<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> StatsCollector for CsvCollector<W> {
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        writeln!(
            self.writer,
            "{}, {}, {}, {}, {}, {}",
            stats.group,
            stats.executions,
            format_millis(stats.p50),
            format_millis(stats.p95),
            format_millis(stats.p99),
            format_millis(stats.max)
        )?;
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

/// Aligned console table that re-prints its header every few rows
///
/// Column widths are fixed when a header is printed and reused until the
/// next one, which happens every `HEADER_EVERY` rows or when the set of
/// columns changes.
pub struct PrettyTableCollector<W: Write + Send> {
    writer: W,
    rows_since_header: usize,
    columns: Vec<(String, usize)>,
}

impl<W: Write + Send> PrettyTableCollector<W> {
    const HEADER_EVERY: usize = 10;
    const PADDING: usize = 2;

    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rows_since_header: 0,
            columns: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Flatten a snapshot into ordered (column, value) cells
    fn unwind(stats: &Stats) -> Vec<(String, String)> {
        let mut cells = vec![
            (
                "timestamp".to_string(),
                stats.timestamp.format("%H:%M:%S%.3f").to_string(),
            ),
            ("group".to_string(), stats.group.clone()),
            ("executions".to_string(), stats.executions.to_string()),
        ];
        if let Some(throughput) = &stats.throughput {
            cells.extend(throughput.iter().map(|(k, v)| (k.clone(), v.to_string())));
        }
        if let Some(coll) = &stats.collection_stats {
            // Sizes that are too wide for a live table are left out
            cells.push(("docCount".to_string(), coll.doc_count.to_string()));
            cells.push(("totalSize".to_string(), coll.total_size.to_string()));
            cells.push(("indexSize".to_string(), coll.index_size.to_string()));
        }
        cells.extend([
            ("p50".to_string(), format_millis(stats.p50)),
            ("p95".to_string(), format_millis(stats.p95)),
            ("p99".to_string(), format_millis(stats.p99)),
            ("max".to_string(), format_millis(stats.max)),
        ]);
        cells
    }

    fn needs_header(&self, cells: &[(String, String)]) -> bool {
        self.rows_since_header % Self::HEADER_EVERY == 0
            || cells.len() != self.columns.len()
            || cells
                .iter()
                .zip(&self.columns)
                .any(|((name, _), (column, _))| name != column)
    }

    fn write_header(&mut self, cells: &[(String, String)]) -> Result<()> {
        self.columns = cells
            .iter()
            .map(|(name, value)| (name.clone(), name.len().max(value.len())))
            .collect();

        let mut header = String::new();
        for (name, width) in &self.columns {
            header.push_str(&format!("{:<w$}", name, w = width + Self::PADDING));
        }
        let rule_len: usize = self
            .columns
            .iter()
            .map(|(_, width)| width + Self::PADDING)
            .sum();

        writeln!(self.writer, "{}", header.trim_end())?;
        writeln!(self.writer, "{}", "-".repeat(rule_len))?;
        self.rows_since_header = 0;
        Ok(())
    }
}

impl PrettyTableCollector<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> StatsCollector for PrettyTableCollector<W> {
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        let cells = Self::unwind(stats);
        if self.needs_header(&cells) {
            self.write_header(&cells)?;
        }

        let mut row = String::new();
        for ((_, value), (_, width)) in cells.iter().zip(&self.columns) {
            row.push_str(&format!("{:<w$}", value, w = width + Self::PADDING));
        }
        writeln!(self.writer, "{}", row.trim_end())?;
        self.writer.flush()?;
        self.rows_since_header += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pretty"
    }
}

/// Keeps every snapshot in memory; clones share the same store
#[derive(Debug, Clone, Default)]
pub struct MemoryCollector {
    stats: Arc<Mutex<Vec<Stats>>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything accepted so far
    pub fn snapshot(&self) -> Vec<Stats> {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.stats.lock() {
            Ok(stats) => stats.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatsCollector for MemoryCollector {
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        self.stats
            .lock()
            .map_err(|_| anyhow!("Memory collector lock poisoned"))?
            .push(stats.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Adapts a closure into a collector
pub struct FnCollector<F>(pub F);

impl<F> StatsCollector for FnCollector<F>
where
    F: FnMut(&Stats) -> Result<()> + Send,
{
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        (self.0)(stats)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

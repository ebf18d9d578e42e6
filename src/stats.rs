// Window Statistics - per-group latency percentiles merged with throughput
// Each flushed batch becomes one immutable Stats snapshot per group.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::collectors::StatsCollector;
use crate::error::HarnessError;
use crate::observability::{record_metric, MetricType};
use crate::pure::performance::{rescale_counters, summarize_latencies};
use crate::summarizers::{Counters, Summarizer};
use crate::types::{CollectionStats, TimedBatch, TimedResult, ValidatedGroup};
use crate::windower::chunked;

/// Durations serialised as fractional milliseconds with microsecond precision
mod fractional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_micros() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        if !millis.is_finite() || millis < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_micros((millis * 1000.0).round() as u64))
    }
}

/// Snapshot of one group over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub timestamp: DateTime<Utc>,
    pub group: String,
    pub executions: usize,
    #[serde(with = "fractional_millis")]
    pub p50: Duration,
    #[serde(with = "fractional_millis")]
    pub p95: Duration,
    #[serde(with = "fractional_millis")]
    pub p99: Duration,
    #[serde(with = "fractional_millis")]
    pub max: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<Counters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_stats: Option<CollectionStats>,
}

impl Stats {
    pub fn with_collection_stats(mut self, collection_stats: CollectionStats) -> Self {
        self.collection_stats = Some(collection_stats);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Latency-only snapshot of a group's results; `None` when there are none
pub fn summarize_durations<T>(group: &ValidatedGroup, results: &[TimedResult<T>]) -> Option<Stats> {
    let durations: Vec<Duration> = results.iter().map(|r| r.duration).collect();
    let latencies = summarize_latencies(&durations)?;

    Some(Stats {
        timestamp: Utc::now(),
        group: group.to_string(),
        executions: latencies.count,
        p50: latencies.p50,
        p95: latencies.p95,
        p99: latencies.p99,
        max: latencies.max,
        throughput: None,
        collection_stats: None,
    })
}

/// Snapshot of one group with throughput rescaled to a per-second rate
pub fn summarize_group<T>(
    group: &ValidatedGroup,
    results: Vec<TimedResult<T>>,
    elapsed: Duration,
    summarizer: &dyn Summarizer<T>,
) -> Result<Option<Stats>> {
    let Some(stats) = summarize_durations(group, &results) else {
        return Ok(None);
    };

    let values: Vec<T> = results.into_iter().map(|r| r.value).collect();
    let raw = summarizer.summarize(&values).map_err(|source| {
        error!(group = %group, error = %source, "Summarizer failed");
        record_metric(MetricType::Failure { kind: "summarizer" });
        HarnessError::Summarizer {
            group: group.to_string(),
            source,
        }
    })?;

    Ok(Some(Stats {
        throughput: Some(rescale_counters(&raw, elapsed)),
        ..stats
    }))
}

/// One snapshot per group present in the batch, ordered by group label
pub fn summarize_batch<T>(batch: TimedBatch<T>, summarizer: &dyn Summarizer<T>) -> Result<Vec<Stats>> {
    let elapsed = batch.elapsed;
    let mut snapshots = Vec::new();
    for (group, results) in batch.partition_by_group() {
        if let Some(stats) = summarize_group(&group, results, elapsed, summarizer)? {
            snapshots.push(stats);
        }
    }
    Ok(snapshots)
}

/// Window a result stream and turn every window into per-group snapshots
pub fn map_stats<S, T, Z>(
    results: S,
    interval: Duration,
    summarizer: Z,
) -> Result<BoxStream<'static, Result<Stats>>>
where
    S: Stream<Item = Result<TimedResult<T>>> + Send + 'static,
    T: Send + 'static,
    Z: Summarizer<T> + 'static,
{
    let summarizer = Arc::new(summarizer);
    let batches = chunked(results, interval)?;

    let snapshots = batches.flat_map(move |batch| {
        let snapshots = batch.and_then(|batch| summarize_batch(batch, summarizer.as_ref()));
        match snapshots {
            Ok(snapshots) => stream::iter(snapshots.into_iter().map(Ok).collect::<Vec<_>>()),
            Err(e) => stream::iter(vec![Err(e)]),
        }
    });

    Ok(snapshots.boxed())
}

/// Totals of a [`collect_stats`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectSummary {
    pub snapshots: usize,
    pub executions: usize,
}

/// Drive a result stream through windowing and summarising into a collector
///
/// Snapshots reach the collector in emission order as soon as they are
/// built. The first error from any stage, or from the collector itself,
/// ends the pass; snapshots already accepted stay accepted.
pub async fn collect_stats<S, T, Z>(
    results: S,
    interval: Duration,
    summarizer: Z,
    collector: &mut dyn StatsCollector,
) -> Result<CollectSummary>
where
    S: Stream<Item = Result<TimedResult<T>>> + Send + 'static,
    T: Send + 'static,
    Z: Summarizer<T> + 'static,
{
    let mut snapshots = map_stats(results, interval, summarizer)?;
    let mut summary = CollectSummary::default();

    while let Some(stats) = snapshots.next().await {
        let stats = stats?;
        let executions = stats.executions;
        let group = stats.group.clone();

        collector.accept(&stats).map_err(|source| {
            error!(collector = collector.name(), error = %source, "Stats collector failed");
            record_metric(MetricType::Failure { kind: "sink" });
            HarnessError::Sink { source }
        })?;

        record_metric(MetricType::StatsEmitted { group, executions });
        summary.snapshots += 1;
        summary.executions += executions;
    }

    Ok(summary)
}

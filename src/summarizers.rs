// Throughput Summarizers
// Pure functions turning one window's domain values into named counters.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hash;

/// Named integer counters of one window, e.g. `{"inserts/s": 120}`
pub type Counters = BTreeMap<String, i64>;

/// Derives throughput counters from a window's values
///
/// Implemented for every `Fn(&[T]) -> Counters`. A summarizer that can fail
/// implements the trait directly; a failure aborts the run.
pub trait Summarizer<T>: Send + Sync {
    fn summarize(&self, values: &[T]) -> Result<Counters>;
}

impl<T, F> Summarizer<T> for F
where
    F: Fn(&[T]) -> Counters + Send + Sync,
{
    fn summarize(&self, values: &[T]) -> Result<Counters> {
        Ok(self(values))
    }
}

/// Sum of integer values under `inserts/s`
pub fn int_summarizer(values: &[i64]) -> Counters {
    Counters::from([("inserts/s".to_string(), values.iter().sum())])
}

/// Key-wise sum of per-item counter maps
pub fn int_map_summarizer(values: &[Counters]) -> Counters {
    let mut merged = Counters::new();
    for counters in values {
        for (name, count) in counters {
            *merged.entry(name.clone()).or_insert(0) += count;
        }
    }
    merged
}

/// Number of occurrences of each distinct value
pub fn count_summarizer<T>(values: &[T]) -> Counters
where
    T: ToString + Eq + Hash,
{
    let mut counts = Counters::new();
    for value in values {
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Outcome of one bulk write call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteOutcome {
    pub inserted: i64,
    pub modified: i64,
    pub matched: i64,
    pub deleted: i64,
    pub upserted: i64,
}

/// Per-kind totals of bulk write outcomes
pub fn bulk_write_summarizer(values: &[BulkWriteOutcome]) -> Counters {
    let total = |f: fn(&BulkWriteOutcome) -> i64| values.iter().map(f).sum::<i64>();
    Counters::from([
        ("inserts/s".to_string(), total(|o| o.inserted)),
        ("modified/s".to_string(), total(|o| o.modified)),
        ("matched/s".to_string(), total(|o| o.matched)),
        ("deleted/s".to_string(), total(|o| o.deleted)),
        ("upserts/s".to_string(), total(|o| o.upserted)),
    ])
}

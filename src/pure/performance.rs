// Latency and Throughput Math - Pure Function Modularization
// Order-statistic percentiles and per-second rate rescaling over one window

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Latency summary of a single window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Interpolated percentile over an ascending-sorted slice
///
/// The rank is `p / 100 * (n - 1)`; the result is the linear interpolation
/// between the two sorted samples bracketing that rank. `p` is clamped to
/// `[0, 100]`. Returns `None` for an empty slice.
pub fn percentile_sorted(sorted: &[Duration], p: f64) -> Option<Duration> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }

    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = p / 100.0 * (n - 1) as f64;
    let lower_idx = (rank.floor() as usize).min(n - 1);
    let upper_idx = (lower_idx + 1).min(n - 1);
    let fraction = rank - lower_idx as f64;

    let lower = sorted[lower_idx].as_nanos() as f64;
    let upper = sorted[upper_idx].as_nanos() as f64;
    let interpolated = (lower + (upper - lower) * fraction).clamp(lower, upper);

    Some(Duration::from_nanos(interpolated.round() as u64))
}

/// Interpolated percentile over unsorted durations
pub fn percentile(durations: &[Duration], p: f64) -> Option<Duration> {
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    percentile_sorted(&sorted, p)
}

/// p50/p95/p99/max of a window's durations, sorting once
pub fn summarize_latencies(durations: &[Duration]) -> Option<LatencySummary> {
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();

    let max = *sorted.last()?;
    Some(LatencySummary {
        count: sorted.len(),
        p50: percentile_sorted(&sorted, 50.0)?,
        p95: percentile_sorted(&sorted, 95.0)?,
        p99: percentile_sorted(&sorted, 99.0)?,
        max,
    })
}

/// Extrapolate a raw count observed over `elapsed` to a per-second rate
///
/// The result is truncated toward zero. A zero-length window leaves the count
/// unscaled.
pub fn rescale_to_per_second(raw_count: i64, elapsed: Duration) -> i64 {
    let elapsed_nanos = elapsed.as_nanos() as i128;
    if elapsed_nanos == 0 {
        return raw_count;
    }
    let scaled = raw_count as i128 * 1_000_000_000 / elapsed_nanos;
    scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Rescale every named counter of a window to a per-second rate
pub fn rescale_counters(
    counters: &BTreeMap<String, i64>,
    elapsed: Duration,
) -> BTreeMap<String, i64> {
    counters
        .iter()
        .map(|(name, count)| (name.clone(), rescale_to_per_second(*count, elapsed)))
        .collect()
}

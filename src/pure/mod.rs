// Pure Functions Module
// Side-effect-free statistics used by the aggregation path

pub mod performance;

pub use performance::{
    percentile, percentile_sorted, rescale_counters, rescale_to_per_second, summarize_latencies,
    LatencySummary,
};

// Typhon - A Load Generation and Measurement Harness
// Root library module

pub mod collectors;
pub mod config;
pub mod error;
pub mod generators;
pub mod mapper;
pub mod observability;
pub mod pure;
pub mod runner;
pub mod stats;
pub mod summarizers;
pub mod types;
pub mod windower;
pub mod wrappers;

// Re-export key types
pub use observability::{
    get_metrics,
    init_logging,
    init_logging_with_level,
    record_metric,
    with_run_context,
    MetricType,
    RunContext,
};

pub use error::{classify, HarnessError};

// Re-export validated types
pub use types::{ByteSize, CollectionStats, TimedBatch, TimedResult, ValidatedGroup};

pub use config::{TestConfig, TestConfigBuilder, TestDefinition, WorkerOption};

pub use generators::{
    CounterGenerator,
    FlowGenerator,
    Generator,
    GeneratorSpec,
    PointwiseGenerator,
    RandomStringGenerator,
};

// Re-export pipeline stages
pub use mapper::{measure_result, par_map, par_map_blocking, par_map_timed, MapOptions};
pub use windower::chunked;
pub use stats::{collect_stats, map_stats, summarize_batch, summarize_group, CollectSummary, Stats};
pub use runner::{counter_stream, generator_stream, run_test, run_test_blocking, RunReport};

pub use summarizers::{
    bulk_write_summarizer,
    count_summarizer,
    int_map_summarizer,
    int_summarizer,
    BulkWriteOutcome,
    Counters,
    Summarizer,
};

pub use collectors::{
    CsvCollector,
    FnCollector,
    JsonLinesCollector,
    MemoryCollector,
    PrettyTableCollector,
    StatsCollector,
};

pub use wrappers::{measure_with_retry, ErrorClass, RetryPolicy, TransientLabels};

// Re-export pure functions
pub use pure::performance;

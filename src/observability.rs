// Centralized Observability Infrastructure for Typhon
// Structured logging setup, per-run trace context and process-wide counters

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters for metrics
static RESULT_COUNTER: AtomicU64 = AtomicU64::new(0);
static WINDOW_COUNTER: AtomicU64 = AtomicU64::new(0);
static STATS_COUNTER: AtomicU64 = AtomicU64::new(0);
static FAILURE_COUNTER: AtomicU64 = AtomicU64::new(0);
static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

const DEFAULT_FILTER: &str = "typhon=warn,error";
const VERBOSE_FILTER: &str = "typhon=debug,info";
const QUIET_FILTER: &str = "error";

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    // --quiet always wins, even over RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(verbose))
    } else {
        filter_for(verbose)
    };

    // Stats go to stdout, so logs stay on stderr
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("Typhon observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

fn filter_for(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    }
}

/// Events counted by the harness
#[derive(Debug, Clone)]
pub enum MetricType {
    /// One work item completed
    ResultMapped { duration: Duration },
    /// A window was flushed by the aggregator
    WindowFlushed { items: usize, elapsed: Duration },
    /// A stats snapshot reached the collector
    StatsEmitted { group: String, executions: usize },
    /// A fatal error of the given class
    Failure { kind: &'static str },
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::ResultMapped { duration } => {
            RESULT_COUNTER.fetch_add(1, Ordering::Relaxed);
            trace!(duration_us = duration.as_micros() as u64, "metric.result mapped");
        }
        MetricType::WindowFlushed { items, elapsed } => {
            WINDOW_COUNTER.fetch_add(1, Ordering::Relaxed);
            debug!(
                items,
                elapsed_ms = elapsed.as_millis(),
                "metric.window flushed"
            );
        }
        MetricType::StatsEmitted { group, executions } => {
            STATS_COUNTER.fetch_add(1, Ordering::Relaxed);
            debug!(group = %group, executions, "metric.stats emitted");
        }
        MetricType::Failure { kind } => {
            FAILURE_COUNTER.fetch_add(1, Ordering::Relaxed);
            debug!("metric.failure {}", kind);
        }
    }
}

/// Trace context of one test run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub trace_id: Uuid,
    pub run: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl RunContext {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            run: run.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn attributes_line(&self) -> String {
        self.attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Run a future inside a run context, logging its start, end and failure
pub async fn with_run_context<F, T>(ctx: RunContext, f: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    info!(
        trace_id = %ctx.trace_id,
        attributes = %ctx.attributes_line(),
        "Starting '{}'", ctx.run
    );
    RUN_COUNTER.fetch_add(1, Ordering::Relaxed);

    let result = f.await;
    let elapsed = ctx.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %ctx.trace_id,
                elapsed_ms = elapsed.as_millis(),
                "Finished '{}' in {:?}", ctx.run, elapsed
            );
        }
        Err(e) => {
            log_error_with_context(e, &ctx);
        }
    }

    result
}

/// Structured error logging with context
pub fn log_error_with_context(error: &anyhow::Error, ctx: &RunContext) {
    let error_chain = error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");

    error!(
        trace_id = %ctx.trace_id,
        run = %ctx.run,
        elapsed_ms = ctx.elapsed().as_millis(),
        error_chain = %error_chain,
        "Run aborted"
    );
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "runs": RUN_COUNTER.load(Ordering::Relaxed),
        "results": RESULT_COUNTER.load(Ordering::Relaxed),
        "windows": WINDOW_COUNTER.load(Ordering::Relaxed),
        "stats": STATS_COUNTER.load(Ordering::Relaxed),
        "failures": FAILURE_COUNTER.load(Ordering::Relaxed),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

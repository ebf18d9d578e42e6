// Typhon CLI - runs built-in workloads through the measurement pipeline
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

use typhon::{
    get_metrics, init_logging_with_level, int_map_summarizer, run_test, run_test_blocking,
    Counters, CsvCollector, GeneratorSpec, JsonLinesCollector, PrettyTableCollector, RunReport,
    StatsCollector, TestConfig, TestDefinition, WorkerOption,
};

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            eprintln!($($arg)*);
        }
    };
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Typhon - load generation and latency measurement harness",
    long_about = None,
    after_help = "EXAMPLES:
  # Hash 10k random strings on 8 workers, one snapshot per second
  typhon run hash --limit 10000 --workers 8

  # Simulated 5ms work for 30 seconds, as CSV
  typhon run sleep --timeout 30 --sleep-ms 5 --output csv

  # Options from a TOML file, overridden on the command line
  typhon run hash --config run.toml --workers 2"
)]
struct Cli {
    /// Enable verbose logging (DEBUG level). Default is WARN level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors and skip the run summary
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in workload and stream per-window statistics to stdout
    Run {
        /// Workload to execute
        #[arg(value_enum)]
        workload: Workload,

        /// TOML file with run options (camelCase keys)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum number of items to process
        #[arg(short, long)]
        limit: Option<u64>,

        /// Stop producing items after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<u32>,

        /// Statistics window in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Index of the first generated item
        #[arg(long)]
        start_offset: Option<u64>,

        /// Wait before each item starts, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Length of generated strings for the hash workload
        #[arg(long, default_value = "64")]
        length: usize,

        /// Seed for reproducible generated strings
        #[arg(long)]
        seed: Option<u64>,

        /// Simulated latency of the sleep workload, in milliseconds
        #[arg(long, default_value = "10")]
        sleep_ms: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Workload {
    /// SHA-256 of random strings
    Hash,
    /// Fixed simulated latency
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Pretty,
}

impl OutputFormat {
    fn collector(self) -> Box<dyn StatsCollector> {
        match self {
            OutputFormat::Json => Box::new(JsonLinesCollector::stdout()),
            OutputFormat::Csv => Box::new(CsvCollector::stdout()),
            OutputFormat::Pretty => Box::new(PrettyTableCollector::stdout()),
        }
    }
}

/// Command-line values that take precedence over the config file
struct Overrides {
    limit: Option<u64>,
    timeout: Option<u64>,
    workers: Option<u32>,
    interval: Option<u64>,
    start_offset: Option<u64>,
    delay_ms: Option<u64>,
}

fn resolve_config(path: Option<&PathBuf>, overrides: Overrides) -> Result<TestConfig> {
    let mut config = match path {
        Some(path) => TestConfig::from_toml_file(path)?,
        None => TestConfig::default(),
    };

    if let Some(limit) = overrides.limit {
        config.limit = Some(limit);
    }
    if let Some(timeout) = overrides.timeout {
        config.timeout_seconds = Some(timeout);
    }
    if let Some(workers) = overrides.workers {
        config.workers = WorkerOption::Fixed(workers);
    }
    if let Some(interval) = overrides.interval {
        config.stats_collection_interval_seconds = interval;
    }
    if let Some(offset) = overrides.start_offset {
        config.start_offset = offset;
    }
    if let Some(delay) = overrides.delay_ms {
        config.delay_millis = delay;
    }

    config.validate()?;
    Ok(config)
}

async fn run_hash(
    config: TestConfig,
    length: usize,
    seed: Option<u64>,
    collector: &mut dyn StatsCollector,
) -> Result<RunReport> {
    let spec = GeneratorSpec::RandomString { length, seed };
    let generator = spec.text_generator();
    let definition = TestDefinition::new("hash", "SHA-256 over random strings", spec, config)
        .with_tag("workload", "hash");

    run_test_blocking(
        &definition,
        &generator,
        |text: String, _index| {
            let digest = Sha256::digest(text.as_bytes());
            Ok(Counters::from([
                ("hash/s".to_string(), 1),
                ("bytes/s".to_string(), (text.len() + digest.len()) as i64),
            ]))
        },
        int_map_summarizer,
        collector,
    )
    .await
}

async fn run_sleep(
    config: TestConfig,
    sleep: Duration,
    collector: &mut dyn StatsCollector,
) -> Result<RunReport> {
    let spec = GeneratorSpec::Counter;
    let generator = spec.text_generator();
    let definition = TestDefinition::new("sleep", "Fixed simulated latency", spec, config)
        .with_tag("workload", "sleep")
        .with_tag("sleepMillis", sleep.as_millis().to_string());

    run_test(
        &definition,
        &generator,
        move |_item: String, _index| async move {
            tokio::time::sleep(sleep).await;
            Ok(Counters::from([("ops/s".to_string(), 1)]))
        },
        int_map_summarizer,
        collector,
    )
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args first to get verbose flag
    let cli = Cli::parse();

    init_logging_with_level(cli.verbose, cli.quiet)?;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Run {
            workload,
            config,
            limit,
            timeout,
            workers,
            interval,
            start_offset,
            delay_ms,
            length,
            seed,
            sleep_ms,
            output,
        } => {
            let config = resolve_config(
                config.as_ref(),
                Overrides {
                    limit,
                    timeout,
                    workers,
                    interval,
                    start_offset,
                    delay_ms,
                },
            )?;
            let mut collector = output.collector();

            let report = match workload {
                Workload::Hash => run_hash(config, length, seed, collector.as_mut()).await?,
                Workload::Sleep => {
                    run_sleep(config, Duration::from_millis(sleep_ms), collector.as_mut()).await?
                }
            };

            qprintln!(
                quiet,
                "Completed {} executions in {} windows ({:?})",
                report.executions,
                report.windows,
                report.elapsed
            );
            qprintln!(quiet, "{}", serde_json::to_string(&get_metrics())?);
        }
    }

    Ok(())
}

// Test Runner - wires a test definition through the whole pipeline
// generator -> bounded mapper -> windower -> stats -> collector

use anyhow::Result;
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::collectors::StatsCollector;
use crate::config::{TestConfig, TestDefinition};
use crate::generators::Generator;
use crate::mapper::{par_map_blocking, par_map_timed, MapOptions};
use crate::observability::{with_run_context, RunContext};
use crate::stats::{collect_stats, CollectSummary, Stats};
use crate::summarizers::Summarizer;
use crate::types::{CollectionStats, TimedResult, ValidatedGroup};

/// End the stream once `timeout` has passed since this call
fn until_deadline<S>(source: S, timeout: Option<Duration>) -> BoxStream<'static, S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send,
{
    match timeout {
        Some(timeout) => {
            let deadline = Instant::now() + timeout;
            source
                .take_while(move |_| future::ready(Instant::now() < deadline))
                .boxed()
        }
        None => source.boxed(),
    }
}

/// Items of `generator` from `config.start_offset`, cut by limit and deadline
///
/// The deadline starts counting when this function is called.
pub fn generator_stream<T: Send + 'static>(
    config: &TestConfig,
    generator: &Generator<T>,
) -> BoxStream<'static, Result<T>> {
    let items = generator.produce(config.start_offset);
    let items = match config.limit {
        Some(limit) => items.take(usize::try_from(limit).unwrap_or(usize::MAX)).boxed(),
        None => items,
    };
    until_deadline(items, config.timeout())
}

/// Counter from `config.start_offset` up to and including `config.limit`
pub fn counter_stream(config: &TestConfig) -> BoxStream<'static, Result<u64>> {
    let start = config.start_offset;
    let counter = match config.limit {
        Some(limit) => stream::iter(start..=limit).map(Ok).boxed(),
        None => stream::iter(start..).map(Ok).boxed(),
    };
    until_deadline(counter, config.timeout())
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Results that made it into a snapshot
    pub executions: usize,
    /// Snapshots handed to the collector
    pub windows: usize,
    pub elapsed: Duration,
}

/// Run a whole test: generate, map, window, summarise and collect
///
/// Work results are grouped under the definition's name. The first fatal
/// error from any stage aborts the run and is returned after the snapshots
/// built so far have been collected.
pub async fn run_test<A, T, F, Fut, Z>(
    definition: &TestDefinition,
    generator: &Generator<A>,
    work: F,
    summarizer: Z,
    collector: &mut dyn StatsCollector,
) -> Result<RunReport>
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A, u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    Z: Summarizer<T> + 'static,
{
    run_pipeline(
        definition,
        generator,
        |items, options| par_map_timed(items, options, work),
        summarizer,
        collector,
    )
    .await
}

/// [`run_test`] for synchronous work functions that block
///
/// Applications run on tokio's blocking pool, up to the configured number of
/// workers at a time.
pub async fn run_test_blocking<A, T, F, Z>(
    definition: &TestDefinition,
    generator: &Generator<A>,
    work: F,
    summarizer: Z,
    collector: &mut dyn StatsCollector,
) -> Result<RunReport>
where
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A, u64) -> Result<T> + Send + Sync + 'static,
    Z: Summarizer<T> + 'static,
{
    run_pipeline(
        definition,
        generator,
        |items, options| par_map_blocking(items, options, work),
        summarizer,
        collector,
    )
    .await
}

async fn run_pipeline<A, T, M, Z>(
    definition: &TestDefinition,
    generator: &Generator<A>,
    map: M,
    summarizer: Z,
    collector: &mut dyn StatsCollector,
) -> Result<RunReport>
where
    A: Send + 'static,
    T: Send + 'static,
    M: FnOnce(
        BoxStream<'static, Result<A>>,
        MapOptions,
    ) -> BoxStream<'static, Result<TimedResult<T>>>,
    Z: Summarizer<T> + 'static,
{
    let config = &definition.config;
    config.validate()?;
    let group = ValidatedGroup::new(definition.name.as_str())?;

    info!("{}", definition.to_pretty_json()?);

    let mut ctx = RunContext::new(definition.name.as_str());
    ctx.add_attribute("workers", config.workers.value().to_string());
    ctx.add_attribute("interval", format!("{:?}", config.interval()));
    if let Some(limit) = config.limit {
        ctx.add_attribute("limit", limit.to_string());
    }
    let start = Instant::now();

    let collection_stats = definition.collection_stats.clone();
    let mut collector = AttachCollectionStats {
        inner: collector,
        collection_stats,
    };

    let summary: CollectSummary = with_run_context(ctx, async {
        let items = generator_stream(config, generator);
        let options = MapOptions::new(group)
            .concurrency(config.concurrency())
            .delay(config.delay())
            .first_index(config.start_offset);
        let results = map(items, options);
        collect_stats(results, config.interval(), summarizer, &mut collector).await
    })
    .await?;

    Ok(RunReport {
        executions: summary.executions,
        windows: summary.snapshots,
        elapsed: start.elapsed(),
    })
}

/// Adds the definition's storage figures to every snapshot
struct AttachCollectionStats<'a> {
    inner: &'a mut dyn StatsCollector,
    collection_stats: Option<CollectionStats>,
}

impl StatsCollector for AttachCollectionStats<'_> {
    fn accept(&mut self, stats: &Stats) -> Result<()> {
        match &self.collection_stats {
            Some(collection_stats) => self
                .inner
                .accept(&stats.clone().with_collection_stats(collection_stats.clone())),
            None => self.inner.accept(stats),
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

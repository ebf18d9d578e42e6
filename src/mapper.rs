// Bounded-Parallelism Mapper
// Applies a work function to every generated item with at most N applications
// in flight, timing each one. The first failure ends the output stream.

use anyhow::Result;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{classify, HarnessError};
use crate::observability::{record_metric, MetricType};
use crate::types::{TimedResult, ValidatedGroup};

/// Settings for one mapped run
#[derive(Debug, Clone)]
pub struct MapOptions {
    pub group: ValidatedGroup,
    /// Maximum simultaneous applications; values below 1 are treated as 1
    pub concurrency: usize,
    /// Wait before each application starts (not part of the measured duration)
    pub delay: Duration,
    /// Index handed to the work function for the first item
    pub first_index: u64,
}

impl MapOptions {
    pub fn new(group: ValidatedGroup) -> Self {
        Self {
            group,
            concurrency: 1,
            delay: Duration::ZERO,
            first_index: 0,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn first_index(mut self, index: u64) -> Self {
        self.first_index = index;
        self
    }
}

/// Await `work` and wrap its value with the wall time it took
pub async fn measure_result<T, Fut>(group: ValidatedGroup, work: Fut) -> Result<TimedResult<T>>
where
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let value = work.await?;
    Ok(TimedResult::new(group, start.elapsed(), value))
}

/// Keep everything up to and including the first error, then end the stream
fn stop_after_first_error<S, T>(results: S) -> impl Stream<Item = Result<T>>
where
    S: Stream<Item = Result<T>>,
{
    results.scan(false, |failed, result| {
        if *failed {
            return future::ready(None);
        }
        if result.is_err() {
            *failed = true;
        }
        future::ready(Some(result))
    })
}

fn generation_error(index: u64, source: anyhow::Error) -> anyhow::Error {
    if classify(&source).is_some() {
        source
    } else {
        anyhow::Error::new(HarnessError::Generation { index, source })
    }
}

/// Task handle that aborts the task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map_err(|e| anyhow::anyhow!("Work task did not complete: {e}"))
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Map `source` through an async work function under a concurrency limit
///
/// Every application runs as its own tokio task, so slow work never holds up
/// whoever polls the output, and its duration is measured on that task. With
/// a limit of 1 results arrive in input order; above that they arrive in
/// completion order. A failing item produces no result: the stream yields a
/// `Transform` error and ends, and in-flight applications are aborted.
pub fn par_map_timed<S, A, T, F, Fut>(
    source: S,
    options: MapOptions,
    transform: F,
) -> BoxStream<'static, Result<TimedResult<T>>>
where
    S: Stream<Item = Result<A>> + Send + 'static,
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A, u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let MapOptions {
        group,
        concurrency,
        delay,
        first_index,
    } = options;
    let concurrency = concurrency.max(1);
    let transform = Arc::new(transform);

    debug!(group = %group, concurrency, delay_ms = delay.as_millis(), "Starting bounded mapper");

    let applications = source.enumerate().map(move |(position, item)| {
        let index = first_index + position as u64;
        let transform = Arc::clone(&transform);
        let group = group.clone();

        async move {
            let item = item.map_err(|e| generation_error(index, e))?;
            let task_group = group.clone();
            let task = AbortOnDrop(tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                measure_result(task_group, transform(item, index)).await
            }));

            match task.await.and_then(|outcome| outcome) {
                Ok(result) => {
                    record_metric(MetricType::ResultMapped {
                        duration: result.duration,
                    });
                    Ok(result)
                }
                Err(source) => {
                    error!(group = %group, index, error = %source, "Transform failed");
                    record_metric(MetricType::Failure { kind: "transform" });
                    Err(anyhow::Error::new(HarnessError::Transform {
                        group: group.to_string(),
                        index,
                        source,
                    }))
                }
            }
        }
    });

    stop_after_first_error(applications.buffer_unordered(concurrency)).boxed()
}

/// [`par_map_timed`] for blocking work functions
///
/// Each application runs on tokio's blocking pool so that slow synchronous
/// calls do not stall the runtime's worker threads.
pub fn par_map_blocking<S, A, T, F>(
    source: S,
    options: MapOptions,
    transform: F,
) -> BoxStream<'static, Result<TimedResult<T>>>
where
    S: Stream<Item = Result<A>> + Send + 'static,
    A: Send + 'static,
    T: Send + 'static,
    F: Fn(A, u64) -> Result<T> + Send + Sync + 'static,
{
    let transform = Arc::new(transform);
    par_map_timed(source, options, move |item, index| {
        let transform = Arc::clone(&transform);
        async move {
            tokio::task::spawn_blocking(move || transform(item, index))
                .await
                .map_err(|e| anyhow::anyhow!("Blocking work function panicked: {e}"))?
        }
    })
}

/// Untimed bounded map with the same fail-fast behaviour
pub fn par_map<S, A, B, F, Fut>(
    source: S,
    concurrency: usize,
    transform: F,
) -> BoxStream<'static, Result<B>>
where
    S: Stream<Item = A> + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<B>> + Send + 'static,
{
    let applications = source.map(transform).buffer_unordered(concurrency.max(1));
    stop_after_first_error(applications).boxed()
}

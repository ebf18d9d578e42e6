// Tick-Driven Windowing Aggregator
// Buffers timed results on a dedicated task and flushes them as one batch per
// interval, or early when the upstream ends. The buffer has a single owner,
// the aggregation loop, so no locking is involved.

use anyhow::{bail, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::HarnessError;
use crate::observability::{record_metric, MetricType};
use crate::types::{TimedBatch, TimedResult};

/// Batches handed to the consumer before the aggregator waits for it
const OUTPUT_CAPACITY: usize = 4;

/// Window an unbounded result stream into [`TimedBatch`]es
///
/// The interval must be positive; a zero interval is rejected before the
/// source is touched. Must be called from within a tokio runtime: the
/// aggregation loop runs on its own task. Dropping the returned stream stops
/// that task, which releases the timer and the source.
///
/// An upstream error is delivered after the pending batch has been flushed,
/// and ends the output.
pub fn chunked<S, T>(source: S, interval: Duration) -> Result<BoxStream<'static, Result<TimedBatch<T>>>>
where
    S: Stream<Item = Result<TimedResult<T>>> + Send + 'static,
    T: Send + 'static,
{
    if interval.is_zero() {
        bail!(HarnessError::configuration(
            "interval",
            format!("interval must be positive, but was {:?}", interval),
        ));
    }

    let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
    tokio::spawn(aggregate(source, interval, tx));
    Ok(ReceiverStream::new(rx).boxed())
}

/// Why a window was flushed
#[derive(Debug, Clone, Copy)]
enum FlushReason {
    Tick,
    End,
    Failure,
}

struct Window<T> {
    items: Vec<TimedResult<T>>,
    opened_at: Instant,
}

impl<T> Window<T> {
    fn new(now: Instant) -> Self {
        Self {
            items: Vec::new(),
            opened_at: now,
        }
    }

    /// Take the buffered results, restarting the window at `now`
    fn take(&mut self, now: Instant, reason: FlushReason) -> Option<TimedBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let capacity = self.items.len();
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(capacity));
        let elapsed = now.saturating_duration_since(self.opened_at);
        self.opened_at = now;

        debug!(items = items.len(), elapsed_ms = elapsed.as_millis(), reason = ?reason, "Flushing window");
        record_metric(MetricType::WindowFlushed {
            items: items.len(),
            elapsed,
        });
        Some(TimedBatch::new(items, elapsed))
    }
}

async fn aggregate<S, T>(source: S, interval: Duration, tx: mpsc::Sender<Result<TimedBatch<T>>>)
where
    S: Stream<Item = Result<TimedResult<T>>> + Send + 'static,
    T: Send + 'static,
{
    let mut source = Box::pin(source);
    let start = Instant::now();
    let mut window = Window::new(start);
    let mut next_tick = start + interval;
    let tick = tokio::time::sleep_until(next_tick);
    tokio::pin!(tick);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Window consumer dropped; stopping aggregator");
                return;
            }
            item = source.next() => match item {
                Some(Ok(result)) => window.items.push(result),
                Some(Err(e)) => {
                    if let Some(batch) = window.take(Instant::now(), FlushReason::Failure) {
                        if tx.send(Ok(batch)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => {
                    if let Some(batch) = window.take(Instant::now(), FlushReason::End) {
                        let _ = tx.send(Ok(batch)).await;
                    }
                    debug!("Result stream ended; aggregator done");
                    return;
                }
            },
            () = &mut tick => {
                let now = Instant::now();
                if let Some(batch) = window.take(now, FlushReason::Tick) {
                    if tx.send(Ok(batch)).await.is_err() {
                        return;
                    }
                }
                // Next deadline from the schedule, skipping ticks missed while blocked
                next_tick += interval;
                let now = Instant::now();
                if next_tick <= now {
                    next_tick = now + interval;
                }
                tick.as_mut().reset(next_tick);
            }
        }
    }
}

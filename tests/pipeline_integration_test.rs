// Pipeline Integration Tests - generator through collector
// End-to-end behaviour of the mapper, windower, stats and collector stages

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use typhon::*;

fn group(name: &str) -> Result<ValidatedGroup> {
    ValidatedGroup::new(name)
}

fn ok_items(values: Vec<u64>) -> impl futures::Stream<Item = Result<u64>> + Send + 'static {
    stream::iter(values.into_iter().map(Ok))
}

fn len_summarizer<T>(values: &[T]) -> Counters {
    Counters::from([("items/s".to_string(), values.len() as i64)])
}

/// Single worker, short run: one batch, in input order
#[tokio::test]
async fn test_single_worker_run_yields_one_ordered_batch() -> Result<()> {
    let results = par_map_timed(
        ok_items(vec![1, 2, 3, 4, 5]),
        MapOptions::new(group("identity")?),
        |item, _index| async move { Ok(item) },
    );

    let batches: Vec<TimedBatch<u64>> = chunked(results, Duration::from_millis(1000))?
        .map(|batch| batch.expect("no failures expected"))
        .collect()
        .await;

    assert_eq!(batches.len(), 1);
    let values: Vec<u64> = batches[0].items.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1, 2, 3, 4, 5]);
    Ok(())
}

/// Parallel run spanning several windows loses and duplicates nothing
#[tokio::test(start_paused = true)]
async fn test_parallel_run_spans_multiple_windows() -> Result<()> {
    let results = par_map_timed(
        ok_items((0..100).collect()),
        MapOptions::new(group("sleepy")?).concurrency(4),
        |item, _index| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(item)
        },
    );

    let batches: Vec<TimedBatch<u64>> = chunked(results, Duration::from_millis(50))?
        .map(|batch| batch.expect("no failures expected"))
        .collect()
        .await;

    assert!(batches.len() > 1, "expected several windows, got {}", batches.len());
    assert!(batches.iter().all(|b| !b.is_empty()));

    let mut seen: Vec<u64> = batches
        .iter()
        .flat_map(|b| b.items.iter().map(|r| r.value))
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    Ok(())
}

/// Per-window throughput is expressed per second
#[test]
fn test_throughput_is_rescaled_per_second() -> Result<()> {
    let g = group("letters")?;
    let batch = TimedBatch::new(
        ["a", "a", "b"]
            .into_iter()
            .map(|v| TimedResult::new(g.clone(), Duration::from_millis(1), v))
            .collect(),
        Duration::from_millis(500),
    );

    let snapshots = summarize_batch(batch, &count_summarizer::<&str>)?;
    let throughput = snapshots[0].throughput.clone().expect("throughput present");
    assert_eq!(throughput["a"], 4);
    assert_eq!(throughput["b"], 2);
    Ok(())
}

/// A zero interval fails before any work is done
#[tokio::test]
async fn test_zero_interval_fails_before_work() -> Result<()> {
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&calls);
    let results = par_map_timed(
        ok_items(vec![1, 2, 3]),
        MapOptions::new(group("never")?),
        move |item, _index| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(item) }
        },
    );

    let mut collector = MemoryCollector::new();
    let err = collect_stats(results, Duration::ZERO, len_summarizer::<u64>, &mut collector)
        .await
        .expect_err("zero interval must be rejected");

    assert!(matches!(classify(&err), Some(HarnessError::Configuration { .. })));
    tokio::task::yield_now().await;
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(collector.is_empty());
    Ok(())
}

/// A failing work function aborts the run after collecting what completed
#[tokio::test]
async fn test_transform_failure_aborts_run() -> Result<()> {
    let config = TestConfigBuilder::new()
        .limit(10)
        .workers(WorkerOption::Fixed(2))
        .build()?;
    let definition = TestDefinition::new("failing", "third item fails", GeneratorSpec::Counter, config);

    let memory = MemoryCollector::new();
    let mut collector = memory.clone();
    let err = run_test(
        &definition,
        &Generator::pointwise(CounterGenerator),
        |item: u64, _index| async move {
            if item == 2 {
                anyhow::bail!("rejected item {}", item);
            }
            Ok(item)
        },
        len_summarizer::<u64>,
        &mut collector,
    )
    .await
    .expect_err("run should fail");

    match classify(&err) {
        Some(HarnessError::Transform { index, group, .. }) => {
            assert_eq!(*index, 2);
            assert_eq!(group, "failing");
        }
        other => panic!("expected transform error, got {:?}", other),
    }

    let collected: usize = memory.snapshot().iter().map(|s| s.executions).sum();
    assert!(collected <= 2, "only items finished before the failure, got {}", collected);
    Ok(())
}

/// Every result of a full run is accounted for exactly once
#[tokio::test(start_paused = true)]
async fn test_run_report_accounts_for_every_item() -> Result<()> {
    let config = TestConfigBuilder::new()
        .limit(40)
        .workers(WorkerOption::Fixed(4))
        .start_offset(1_000)
        .build()?;
    let definition = TestDefinition::new("counted", "", GeneratorSpec::Counter, config);

    let memory = MemoryCollector::new();
    let mut collector = memory.clone();
    let report = run_test(
        &definition,
        &Generator::pointwise(CounterGenerator),
        |item: u64, index| async move {
            assert_eq!(item, index);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(1_i64)
        },
        int_summarizer,
        &mut collector,
    )
    .await?;

    assert_eq!(report.executions, 40);
    // 10 rounds of 100ms each inside 1s windows
    assert!(report.windows >= 1);
    let inserted: i64 = memory
        .snapshot()
        .iter()
        .filter_map(|s| s.throughput.as_ref())
        .map(|t| t["inserts/s"])
        .sum();
    assert!(inserted > 0);
    Ok(())
}

/// Snapshots stream to a CSV collector in emission order
#[tokio::test]
async fn test_csv_output_end_to_end() -> Result<()> {
    let results = par_map_timed(
        ok_items((0..5).collect()),
        MapOptions::new(group("csv")?),
        |item, _index| async move { Ok(item) },
    );

    let mut collector = CsvCollector::new(Vec::new());
    let summary = collect_stats(results, Duration::from_secs(1), len_summarizer::<u64>, &mut collector).await?;
    assert_eq!(summary.snapshots, 1);
    assert_eq!(summary.executions, 5);

    let text = String::from_utf8(collector.into_inner())?;
    assert!(text.starts_with("csv, 5, "));
    Ok(())
}

/// A collector that starts failing stops the pass but keeps earlier snapshots
#[tokio::test]
async fn test_failing_collector_stops_collection() -> Result<()> {
    let results = stream::iter(["a", "b"].into_iter().map(|name| -> Result<TimedResult<u64>> {
        Ok(TimedResult::new(group(name)?, Duration::from_millis(1), 1))
    }));

    let delivered = std::sync::Arc::new(std::sync::Mutex::new(Vec::<Stats>::new()));
    let store = std::sync::Arc::clone(&delivered);
    let mut collector = FnCollector(move |stats: &Stats| -> Result<()> {
        let mut accepted = store.lock().expect("store lock");
        if !accepted.is_empty() {
            anyhow::bail!("collector is full");
        }
        accepted.push(stats.clone());
        Ok(())
    });

    let err = collect_stats(results, Duration::from_secs(1), len_summarizer::<u64>, &mut collector)
        .await
        .expect_err("second snapshot must fail");

    assert!(matches!(classify(&err), Some(HarnessError::Sink { .. })));
    let delivered = delivered.lock().expect("store lock");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].group, "a");
    Ok(())
}

/// A run whose collector fails on the second window ends with a sink error
#[tokio::test(start_paused = true)]
async fn test_failing_collector_aborts_run() -> Result<()> {
    let config = TestConfigBuilder::new()
        .limit(6)
        .workers(WorkerOption::Fixed(1))
        .build()?;
    let definition = TestDefinition::new("sinking", "", GeneratorSpec::Counter, config);

    let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&calls);
    let memory = MemoryCollector::new();
    let mut store = memory.clone();
    let mut collector = FnCollector(move |stats: &Stats| -> Result<()> {
        if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1 {
            anyhow::bail!("collector went away");
        }
        store.accept(stats)
    });

    let err = run_test(
        &definition,
        &Generator::pointwise(CounterGenerator),
        |item: u64, _index| async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            Ok(item)
        },
        len_summarizer::<u64>,
        &mut collector,
    )
    .await
    .expect_err("second window must fail");

    assert!(matches!(classify(&err), Some(HarnessError::Sink { .. })));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    let accepted = memory.snapshot();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].group, "sinking");
    assert!(accepted[0].executions >= 1);
    Ok(())
}

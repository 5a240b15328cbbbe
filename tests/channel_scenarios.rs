//! End-to-end channel scenarios.
//!
//! These tests run whole pipelines through the `run_*` entry points and
//! check the elements, completion values and causes a consumer observes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use millrace::channel::{FlatMapOptions, HaltStrategy, MapEffectOptions, MergeAllOptions};
use millrace::testing::FinalizerProbe;
use millrace::{assert_fail, Cause, Channel, Exit, Reason};
use tokio::sync::Notify;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

// ============================================================================
// Sequential pipelines
// ============================================================================

#[tokio::test]
async fn map_then_collect() {
    let doubled = Channel::<i32>::from_array(vec![1, 2, 3]).map(|x| x * 2);
    assert_eq!(doubled.run_collect().await, Ok(vec![2, 4, 6]));
}

#[tokio::test]
async fn concat_two_sources() {
    let both = Channel::<i32>::from_array(vec![1, 2]).concat(Channel::from_array(vec![3, 4]));
    assert_eq!(both.run_collect().await, Ok(vec![1, 2, 3, 4]));
}

#[tokio::test]
async fn word_count_pipeline() {
    let lines = vec!["the quick brown fox", "jumps over", "the lazy dog"];
    let words = Channel::<&str>::from_array(lines)
        .flat_map(
            |line| Channel::from_array(line.split_whitespace().collect::<Vec<_>>()),
            FlatMapOptions::new(),
        )
        .filter(|word| *word != "the")
        .rechunk(2)
        .map_accum(0usize, |seen, batch| (seen + batch.len(), vec![seen + batch.len()]));

    assert_eq!(words.run_collect().await, Ok(vec![2, 4, 6, 7]));
}

// ============================================================================
// Merging
// ============================================================================

#[tokio::test]
async fn merge_either_with_failing_side_fails() {
    let merged = Channel::<i32, String>::from_array(vec![1])
        .merge(Channel::fail("e".to_string()), HaltStrategy::Either);

    let cause = timeout(DEADLINE, merged.run_collect())
        .await
        .expect("merge should terminate")
        .unwrap_err();

    assert_eq!(cause.reasons().len(), 1);
    assert_eq!(cause.reasons()[0], Reason::fail("e".to_string()));
}

#[tokio::test]
async fn merge_delivers_elements_before_failure() {
    let collected = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = collected.clone();

    let merged = Channel::<i32, String>::from_array(vec![1])
        .merge(Channel::fail("e".to_string()), HaltStrategy::Either);
    let exit = timeout(
        DEADLINE,
        merged.run_for_each(move |x| {
            sink.lock().unwrap().push(x);
            async { Ok(()) }
        }),
    )
    .await
    .expect("merge should terminate");

    assert_fail!(exit, "e".to_string());
    assert!(collected.lock().unwrap().iter().all(|x| *x == 1));
}

#[tokio::test]
async fn switch_merge_keeps_only_latest_child() {
    let slow = Channel::<i32>::from_iter(0..).map_effect(
        |x| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(x)
        },
        MapEffectOptions::new(),
    );
    let fast = Channel::<i32>::from_array(vec![1, 2, 3]);

    let merged = Channel::<Channel<i32>>::from_array(vec![slow, fast]).merge_all(
        MergeAllOptions::new()
            .with_concurrency(2)
            .with_switch(true),
    );

    let collected = timeout(DEADLINE, merged.run_collect())
        .await
        .expect("switching should interrupt the slow child");
    assert_eq!(collected, Ok(vec![1, 2, 3]));
}

#[tokio::test]
async fn switch_merge_closes_interrupted_child_scope() {
    let probe = FinalizerProbe::new();
    let started = Arc::new(Notify::new());

    let signal = started.clone();
    let slow = probe.attach(Channel::<i32>::from_effect(move || {
        let signal = signal.clone();
        async move {
            signal.notify_one();
            futures::future::pending::<Exit<i32, Infallible>>().await
        }
    }));
    let fast = Channel::<i32>::from_array(vec![7, 8]);

    let children = Channel::<Channel<i32>>::succeed(slow).concat(Channel::<Channel<i32>>::from_effect(
        move || {
            let started = started.clone();
            let fast = fast.clone();
            async move {
                started.notified().await;
                Ok(fast)
            }
        },
    ));
    let merged = children.merge_all(
        MergeAllOptions::new()
            .with_concurrency(2)
            .with_switch(true),
    );

    let collected = timeout(DEADLINE, merged.run_collect())
        .await
        .expect("switching should interrupt the slow child");
    assert_eq!(collected, Ok(vec![7, 8]));

    let exits = probe.exits();
    assert_eq!(exits.len(), 1);
    assert!(exits[0].as_ref().unwrap_err().is_interrupted_only());
}

#[tokio::test]
async fn merge_all_fans_in_concurrent_children() {
    let children = Channel::<u32>::from_array((0..8).collect()).map(|n| {
        Channel::<u32>::from_effect(move || async move {
            tokio::time::sleep(Duration::from_millis(u64::from(8 - n))).await;
            Ok(n)
        })
    });
    let mut collected = children
        .merge_all(MergeAllOptions::new().with_concurrency(4))
        .run_collect()
        .await
        .unwrap();
    collected.sort();
    assert_eq!(collected, (0..8).collect::<Vec<_>>());
}

// ============================================================================
// Recovery and piping
// ============================================================================

#[tokio::test]
async fn recover_then_keep_reading_upstream() {
    // The replacement picks up the remaining upstream elements.
    let parse = Channel::<&str, String, (), &str, String, ()>::identity()
        .map_effect(
            |raw| async move { raw.parse::<i32>().map_err(|e| Cause::fail(e.to_string())) },
            MapEffectOptions::new(),
        );
    let fallback = Channel::<&str, String, (), &str, String, ()>::identity().map(|_| -1);
    let tolerant = parse.catch(move |_| fallback.clone());

    let source = Channel::<&str, String>::from_iter_chunked(vec!["1", "x", "3"], 1);
    assert_eq!(source.pipe_to(tolerant).run_collect().await, Ok(vec![1, -1]));
}

#[tokio::test]
async fn pipe_to_or_fail_reports_source_cause() {
    let sum = Channel::<i64, Infallible, (), i64, Infallible, ()>::identity()
        .map_error(|never: Infallible| -> String { match never {} })
        .scan(0, |acc, x| acc + x);
    let source = Channel::<i64, String>::from_array(vec![1, 2])
        .concat(Channel::<i64, String>::fail("disk".to_string()));

    let exit = source.pipe_to_or_fail(sum).run_collect().await;
    assert_fail!(exit, "disk".to_string());
}

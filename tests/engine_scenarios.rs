//! End-to-end behavior of the engine over in-memory backends.

use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use viewcount::{MemoryViewCountStore, RecordOutcome, ViewCountError};

mod common;
use common::test_helpers::{id, visitor, FlakyStore, StalledStore, TestEngine};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_views_from_one_visitor_count_once() {
    let env = Arc::new(TestEngine::new(Arc::new(MemoryViewCountStore::new())));

    let handles = (0..100).map(|_| {
        let env = Arc::clone(&env);
        tokio::spawn(async move { env.engine.record_view(42, &visitor("a")).await.unwrap() })
    });
    let counted = join_all(handles)
        .await
        .into_iter()
        .filter(|outcome| *outcome.as_ref().unwrap() == RecordOutcome::Counted)
        .count();

    assert_eq!(counted, 1);
    assert_eq!(env.pending(42).await, 1);
}

#[tokio::test]
async fn test_view_counts_again_after_dedup_window() {
    let env = TestEngine::new(Arc::new(MemoryViewCountStore::new()));

    assert_eq!(
        env.engine.record_view(42, &visitor("a")).await.unwrap(),
        RecordOutcome::Counted
    );
    env.clock.advance(Duration::from_secs(25 * 60 * 60));
    assert_eq!(
        env.engine.record_view(42, &visitor("a")).await.unwrap(),
        RecordOutcome::Counted
    );
    assert_eq!(env.pending(42).await, 2);
}

#[tokio::test]
async fn test_view_inside_window_stays_duplicate() {
    let env = TestEngine::new(Arc::new(MemoryViewCountStore::new()));

    env.engine.record_view(42, &visitor("a")).await.unwrap();
    env.clock.advance(Duration::from_secs(23 * 60 * 60));
    assert_eq!(
        env.engine.record_view(42, &visitor("a")).await.unwrap(),
        RecordOutcome::Duplicate
    );
    assert_eq!(env.pending(42).await, 1);
}

#[tokio::test]
async fn test_repeat_visitor_then_flush_then_merge() {
    let store = Arc::new(MemoryViewCountStore::new());
    store.seed(id(42), 100);
    let env = TestEngine::new(store.clone());

    for _ in 0..3 {
        env.engine.record_view(42, &visitor("a")).await.unwrap();
    }
    env.engine.record_view(42, &visitor("b")).await.unwrap();
    assert_eq!(env.pending(42).await, 2);
    assert_eq!(
        env.engine.displayed_counts(&[id(42)]).await.unwrap(),
        vec![(id(42), 102)]
    );

    let report = env.engine.flush_now().await.unwrap();
    assert_eq!(report.flushed, vec![id(42)]);
    assert_eq!(report.total_delta, 2);
    assert_eq!(store.count(id(42)), 102);
    assert_eq!(env.pending(42).await, 0);

    // Same displayed value before and after the flush
    assert_eq!(
        env.engine.displayed_counts(&[id(42)]).await.unwrap(),
        vec![(id(42), 102)]
    );
}

#[tokio::test]
async fn test_increment_between_flushes_survives() {
    let store = Arc::new(MemoryViewCountStore::new());
    let env = TestEngine::new(store.clone());

    env.engine.record_view(1, &visitor("a")).await.unwrap();
    env.engine.flush_now().await.unwrap();
    env.engine.record_view(1, &visitor("b")).await.unwrap();

    assert_eq!(store.count(id(1)), 1);
    assert_eq!(env.pending(1).await, 1);
    assert_eq!(
        env.engine.displayed_counts(&[id(1)]).await.unwrap(),
        vec![(id(1), 2)]
    );
}

#[tokio::test]
async fn test_empty_cycle_makes_no_store_calls() {
    let store = Arc::new(MemoryViewCountStore::new());
    let env = TestEngine::new(store.clone());

    let report = env.engine.flush_now().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(store.write_calls(), 0);
    assert_eq!(store.read_calls(), 0);
    assert_eq!(env.metrics.flush.empty_cycles.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_failed_flush_retries_accumulated_delta_once() {
    let store = Arc::new(FlakyStore::new());
    let env = TestEngine::new(store.clone());

    env.engine.record_view(42, &visitor("a")).await.unwrap();
    env.engine.record_view(42, &visitor("b")).await.unwrap();

    store.set_failing(true);
    assert!(env.engine.flush_now().await.is_err());
    assert_eq!(store.inner.count(id(42)), 0);
    assert_eq!(env.pending(42).await, 2);

    env.engine.record_view(42, &visitor("c")).await.unwrap();
    store.set_failing(false);
    let report = env.engine.flush_now().await.unwrap();
    assert_eq!(report.total_delta, 3);
    assert_eq!(store.inner.count(id(42)), 3);

    // Nothing left to replay
    env.engine.flush_now().await.unwrap();
    assert_eq!(store.inner.count(id(42)), 3);
    assert_eq!(store.attempts(), 2);
}

#[tokio::test]
async fn test_store_read_failure_surfaces_but_recording_continues() {
    let store = Arc::new(FlakyStore::new());
    store.inner.seed(id(42), 10);
    let env = TestEngine::new(store.clone());

    store.set_failing(true);
    assert_eq!(
        env.engine.record_view(42, &visitor("a")).await.unwrap(),
        RecordOutcome::Counted
    );
    let err = env.engine.displayed_counts(&[id(42)]).await.unwrap_err();
    assert!(matches!(err, ViewCountError::NetworkError(_)));
    // Already-loaded counts still merge without the store
    assert_eq!(
        env.engine.merge_or_persisted(&[(id(42), 10)]).await,
        vec![(id(42), 11)]
    );

    store.set_failing(false);
    assert_eq!(
        env.engine.displayed_counts(&[id(42)]).await.unwrap(),
        vec![(id(42), 11)]
    );
}

#[tokio::test]
async fn test_partial_batch_keeps_uncommitted_dirty() {
    let store = Arc::new(FlakyStore::new());
    let env = TestEngine::new(store.clone());

    env.engine.record_view(1, &visitor("a")).await.unwrap();
    env.engine.record_view(2, &visitor("a")).await.unwrap();
    env.engine.record_view(2, &visitor("b")).await.unwrap();

    store.reject_ids(&[id(2)]);
    let report = env.engine.flush_now().await.unwrap();
    assert_eq!(report.flushed, vec![id(1)]);
    assert_eq!(report.retained, vec![id(2)]);
    assert_eq!(env.pending(1).await, 0);
    assert_eq!(env.pending(2).await, 2);

    store.reject_ids(&[]);
    let report = env.engine.flush_now().await.unwrap();
    assert_eq!(report.flushed, vec![id(2)]);
    assert_eq!(store.inner.count(id(1)), 1);
    assert_eq!(store.inner.count(id(2)), 2);
}

#[tokio::test]
async fn test_stalled_store_times_out_and_keeps_deltas() {
    let env = TestEngine::new(Arc::new(StalledStore));
    env.engine.record_view(9, &visitor("a")).await.unwrap();

    let err = env.engine.flush_now().await.unwrap_err();
    assert!(matches!(err, ViewCountError::TimedOut(_)));
    assert_eq!(env.pending(9).await, 1);
    assert!(!env.engine.scheduler().is_flushing());
}

#[tokio::test]
async fn test_background_flush_drains_pending() {
    let store = Arc::new(MemoryViewCountStore::new());
    let env = TestEngine::new(store.clone());

    env.engine.start().await;
    env.engine.record_view(3, &visitor("a")).await.unwrap();
    env.engine.record_view(3, &visitor("b")).await.unwrap();

    // interval_secs = 1 in the test config
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.count(id(3)), 2);
    assert_eq!(env.pending(3).await, 0);

    env.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_remaining_deltas() {
    let store = Arc::new(MemoryViewCountStore::new());
    let env = TestEngine::new(store.clone());

    env.engine.start().await;
    env.engine.record_view(8, &visitor("a")).await.unwrap();
    let report = env.engine.shutdown().await.unwrap();

    assert_eq!(report.total_delta, 1);
    assert_eq!(store.count(id(8)), 1);
}

#[tokio::test]
async fn test_anonymous_visitors_split_by_user_agent() {
    let env = TestEngine::new(Arc::new(MemoryViewCountStore::new()));
    let addr = Some("203.0.113.7:443".parse().unwrap());

    let firefox = viewcount::VisitorDescriptor::anonymous(addr, Some("Firefox"));
    let chrome = viewcount::VisitorDescriptor::anonymous(addr, Some("Chrome"));

    env.engine.record_view(5, &firefox).await.unwrap();
    env.engine.record_view(5, &firefox).await.unwrap();
    env.engine.record_view(5, &chrome).await.unwrap();
    assert_eq!(env.pending(5).await, 2);
}

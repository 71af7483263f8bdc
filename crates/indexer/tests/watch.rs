//! Watch sessions driven through triggers and recovery, not raw fs events

mod common;

use common::{open, python_source, write};
use gitvec_indexer::{
    watch_session_path, ProgressControl, WatchOptions, WatchSession, WatchSessionMetadata,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn fast_options() -> WatchOptions {
    WatchOptions {
        debounce: Duration::from_millis(50),
        max_batch_wait: Duration::from_millis(200),
        notify_poll_interval: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_interrupted_cycle_is_recovered_on_start() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", &python_source("a", 3));
    write(dir.path(), "b.py", &python_source("b", 3));

    let session_path = watch_session_path(dir.path());
    let mut previous = WatchSessionMetadata::default();
    previous.begin_cycle(["a.py".to_string()]);
    previous.save(&session_path).await.unwrap();

    let h = open(dir.path()).await;
    let engine = Arc::new(h.engine);
    let session = WatchSession::start(Arc::clone(&engine), fast_options())
        .await
        .unwrap();
    let mut updates = session.subscribe_updates();

    let update = timeout(Duration::from_secs(10), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(update.success, "{:?}", update.error);
    assert_eq!(update.reason, "recovery");
    assert_eq!(update.paths, vec!["a.py".to_string()]);
    assert_eq!(update.stats.unwrap().files_processed, 1);

    session.shutdown().await.unwrap();

    let saved = WatchSessionMetadata::load(&session_path).await.unwrap();
    assert!(saved.pending_recovery().is_empty());
    assert_eq!(saved.cycles_completed, 1);
    assert!(saved.session_started_at.is_some());

    let status = engine.status().await.unwrap();
    assert_eq!(status.indexed_files, 1);
}

#[tokio::test]
async fn test_trigger_runs_full_pass() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", &python_source("a", 3));
    write(dir.path(), "b.py", &python_source("b", 3));

    let h = open(dir.path()).await;
    let engine = Arc::new(h.engine);
    let session = WatchSession::start(Arc::clone(&engine), fast_options())
        .await
        .unwrap();
    let mut updates = session.subscribe_updates();

    session.trigger("manual").await.unwrap();
    let update = loop {
        let update = timeout(Duration::from_secs(10), updates.recv())
            .await
            .unwrap()
            .unwrap();
        if update.reason == "manual" {
            break update;
        }
    };
    assert!(update.success, "{:?}", update.error);
    assert!(update.paths.is_empty());
    assert_eq!(update.stats.unwrap().files_processed, 2);

    let health = session.health_snapshot();
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.last_success.is_some());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interrupted_run_is_resumed_on_start() {
    let dir = TempDir::new().unwrap();
    for i in 0..6 {
        write(dir.path(), &format!("f{i}.py"), &python_source(&format!("f{i}"), 3));
    }

    let h = open(dir.path()).await;
    let cancel_at_two = |current: usize, _: usize, _: &str, _: &str| {
        if current >= 2 {
            ProgressControl::Cancel
        } else {
            ProgressControl::Continue
        }
    };
    let first = h.engine.index(&cancel_at_two).await.unwrap();
    assert!(first.cancelled());
    let done = first.totals().files_processed;

    let engine = Arc::new(h.engine);
    let session = WatchSession::start(Arc::clone(&engine), fast_options())
        .await
        .unwrap();
    let mut updates = session.subscribe_updates();

    let update = timeout(Duration::from_secs(10), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(update.success, "{:?}", update.error);
    assert_eq!(update.reason, "resume");
    assert!(update.paths.is_empty());
    assert_eq!(update.stats.unwrap().files_processed, 6 - done);

    session.shutdown().await.unwrap();
    assert!(!engine.can_resume().await);
    assert_eq!(engine.status().await.unwrap().indexed_files, 6);
}

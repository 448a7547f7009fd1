//! Integration tests for the SQLite sample store.
//!
//! Covers append ordering, lazy cursors, retention pruning and its counters, the
//! single-active-session lock, durability across reopen, and corruption handling.

mod common;

use std::fs;

use blo_tracker_lib::db::{maintenance, Database, SessionState, StopReason, StoreError};
use chrono::{Duration, TimeZone, Utc};
use common::{open_store, sample_at, seed_session};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn appended_samples_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-order").await;

    let start = Utc::now();
    for i in 0..5u64 {
        let sample = sample_at(&session.id, i * 1_000, start + Duration::seconds(i as i64));
        db.append(&sample).await.unwrap();
    }

    let samples = db
        .read_since(Utc.timestamp_millis_opt(0).unwrap())
        .collect()
        .await
        .unwrap();
    assert_eq!(samples.len(), 5);
    assert!(samples
        .windows(2)
        .all(|pair| pair[0].timestamp.monotonic_ms <= pair[1].timestamp.monotonic_ms));
    assert_eq!(db.sample_count().await.unwrap(), 5);
}

#[tokio::test]
async fn read_since_filters_on_wall_clock() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-since").await;

    // Whole milliseconds, the resolution the store keeps.
    let start = Utc
        .timestamp_millis_opt(Utc::now().timestamp_millis() - 2 * 3_600_000)
        .unwrap();
    for i in 0..4u64 {
        let at = start + Duration::minutes(30 * i as i64);
        db.append(&sample_at(&session.id, i * 1_800_000, at)).await.unwrap();
    }

    let cutoff = start + Duration::minutes(60);
    let recent = db.read_since(cutoff).collect().await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|s| s.timestamp.wall_clock >= cutoff));
}

#[tokio::test]
async fn cursor_pages_lazily_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-cursor").await;

    let start = Utc::now();
    for i in 0..5u64 {
        db.append(&sample_at(&session.id, i, start)).await.unwrap();
    }

    let mut cursor = db
        .read_session_since(&session.id, start - Duration::seconds(1))
        .with_page_size(2);

    let first = cursor.try_next().await.unwrap().unwrap();
    assert_eq!(first.timestamp.monotonic_ms, 0);

    // Rows appended after the first fetch are outside the pinned range.
    db.append(&sample_at(&session.id, 99, start)).await.unwrap();

    let rest = cursor.collect().await.unwrap();
    assert_eq!(
        rest.iter().map(|s| s.timestamp.monotonic_ms).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(cursor.try_next().await.unwrap().is_none());

    cursor.restart();
    let again = cursor.collect().await.unwrap();
    assert_eq!(again.len(), 6);
    assert_eq!(again.last().unwrap().timestamp.monotonic_ms, 99);
}

#[tokio::test]
async fn out_of_order_sample_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-ooo").await;
    let now = Utc::now();

    db.append(&sample_at(&session.id, 5_000, now)).await.unwrap();
    let err = db
        .append(&sample_at(&session.id, 4_000, now))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::OutOfOrder {
            last_ms: 5_000,
            got_ms: 4_000,
            ..
        }
    ));
    assert_eq!(db.sample_count().await.unwrap(), 1);
}

#[tokio::test]
async fn append_for_unknown_session_fails_to_write() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());

    let err = db
        .append(&sample_at("missing", 0, Utc::now()))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::WriteFailed(_)));
    assert_eq!(db.sample_count().await.unwrap(), 0);
    assert!(!db.is_poisoned());
}

#[tokio::test]
async fn prune_drops_old_samples_and_updates_counters() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-prune").await;

    let now = Utc::now();
    for i in 0..3u64 {
        let at = now - Duration::days(40) + Duration::minutes(i as i64);
        db.append(&sample_at(&session.id, i, at)).await.unwrap();
    }
    db.append(&sample_at(&session.id, 10, now)).await.unwrap();

    let before = db.stats().await.unwrap();
    assert_eq!(before.sample_count, 4);
    assert!(before.approx_bytes > 0);
    assert!(before.page_bytes > 0);

    let pruned = db.prune(now - Duration::days(30)).await.unwrap();
    assert_eq!(pruned, 3);

    let after = db.stats().await.unwrap();
    assert_eq!(after.sample_count, 1);
    assert_eq!(after.pruned_total, 3);
    assert!(after.approx_bytes < before.approx_bytes);

    assert_eq!(db.prune(now - Duration::days(30)).await.unwrap(), 0);
    let remaining = db.read_since(now - Duration::days(365)).collect().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp.monotonic_ms, 10);
}

#[tokio::test]
async fn only_one_session_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let first = seed_session(&db, "s-first").await;

    let second = blo_tracker_lib::TrackingSession::begin("s-second".into(), Utc::now());
    let err = db.open_session(&second).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::SessionConflict {
            active: first.id.clone()
        }
    );

    db.close_session(
        &first.id,
        SessionState::Stopped,
        Some(StopReason::Requested),
        Utc::now(),
    )
    .await
    .unwrap();
    db.open_session(&second).await.unwrap();

    let active = db.active_session().await.unwrap().unwrap();
    assert_eq!(active.id, "s-second");

    let closed = db.get_session(&first.id).await.unwrap().unwrap();
    assert_eq!(closed.state, SessionState::Stopped);
    assert_eq!(closed.stop_reason, Some(StopReason::Requested));
    assert!(closed.ended_at.is_some());
    assert_eq!(db.list_sessions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn close_session_rejects_non_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-terminal").await;

    let err = db
        .close_session(&session.id, SessionState::Armed, None, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::WriteFailed(_)));
}

#[tokio::test]
async fn samples_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    {
        let db = open_store(dir.path());
        let session = seed_session(&db, "s-durable").await;
        db.append(&sample_at(&session.id, 1, now)).await.unwrap();
        db.append(&sample_at(&session.id, 2, now)).await.unwrap();
    }

    let db = open_store(dir.path());
    assert_eq!(db.sample_count().await.unwrap(), 2);
    let last = db.last_sample("s-durable").await.unwrap().unwrap();
    assert_eq!(last.timestamp.monotonic_ms, 2);
    assert_eq!(
        last.timestamp.wall_clock.timestamp_millis(),
        now.timestamp_millis()
    );
    assert_eq!(
        db.active_session().await.unwrap().map(|s| s.id),
        Some("s-durable".to_string())
    );
}

#[test]
fn garbage_file_is_reported_corrupt_and_can_be_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.sqlite3");
    fs::write(&path, vec![0x5a_u8; 8192]).unwrap();

    let err = match Database::new(path.clone()) {
        Ok(_) => panic!("garbage file opened as a database"),
        Err(err) => err,
    };
    assert!(err.is_corrupt(), "unexpected error: {err:?}");

    let db = Database::recreate(path).unwrap();
    assert!(!db.is_poisoned());
}

#[tokio::test]
async fn retention_task_prunes_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(dir.path());
    let session = seed_session(&db, "s-retention").await;

    let now = Utc::now();
    db.append(&sample_at(&session.id, 0, now - Duration::days(40)))
        .await
        .unwrap();
    db.append(&sample_at(&session.id, 1_000, now)).await.unwrap();

    let token = CancellationToken::new();
    let handle = maintenance::spawn_retention(
        db.clone(),
        Duration::days(30),
        std::time::Duration::from_millis(20),
        token.clone(),
    );

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while db.sample_count().await.unwrap() != 1 {
        assert!(tokio::time::Instant::now() < deadline, "retention never ran");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    token.cancel();
    handle.await.unwrap();
    assert_eq!(db.stats().await.unwrap().pruned_total, 1);
}

//! Integration tests for the metric snapshot store
//!
//! Exercises the is_last invariant, week/month trend deltas, the no-op
//! path for unchanged counts, and repair of duplicate is_last rows.

use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

use tally::metrics::{SnapshotStore, SqliteSnapshotStore, WEEK_SECS};

async fn memory_store() -> SqliteSnapshotStore {
    // A single connection keeps every query on the same in-memory database.
    let store = SqliteSnapshotStore::new("sqlite::memory:", 1).await.unwrap();
    store.init().await.unwrap();
    store
}

fn midnight(y: i32, m: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp()
}

#[tokio::test]
async fn first_snapshot_has_no_deltas() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();

    let outcome = store
        .record_snapshot(subject, "view", 5, midnight(2026, 8, 25))
        .await
        .unwrap();

    assert!(outcome.is_recorded());
    let snapshot = outcome.snapshot();
    assert_eq!(snapshot.count, 5);
    assert!(snapshot.is_last);
    assert_eq!(snapshot.delta_period1, None);
    assert_eq!(snapshot.delta_period2, None);
}

#[tokio::test]
async fn snapshot_less_than_a_week_old_is_no_baseline() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();

    store
        .record_snapshot(subject, "view", 3, midnight(2026, 8, 24))
        .await
        .unwrap();
    let outcome = store
        .record_snapshot(subject, "view", 7, midnight(2026, 8, 25))
        .await
        .unwrap();

    // Yesterday's snapshot is not >= 7 days old, so both deltas stay null.
    assert_eq!(outcome.snapshot().delta_period1, None);
    assert_eq!(outcome.snapshot().delta_period2, None);
}

#[tokio::test]
async fn week_and_month_deltas_use_nearest_old_enough_baseline() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();
    let now = midnight(2026, 8, 25);

    // count=1 a month ago, count=1 a week ago, count=2 now.
    store
        .record_snapshot(subject, "view", 1, midnight(2026, 7, 25))
        .await
        .unwrap();
    store
        .record_snapshot(subject, "view", 1, now - WEEK_SECS)
        .await
        .unwrap();
    let outcome = store.record_snapshot(subject, "view", 2, now).await.unwrap();

    let snapshot = outcome.snapshot();
    assert_eq!(snapshot.delta_period1, Some(1.0));
    assert_eq!(snapshot.delta_period2, Some(1.0));

    // Both prior snapshots were demoted; exactly one is_last remains.
    let history = store.history(subject, "view").await.unwrap();
    assert_eq!(history.len(), 3);
    let last: Vec<_> = history.iter().filter(|s| s.is_last).collect();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].count, 2);
}

#[tokio::test]
async fn deltas_may_be_negative() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();
    let now = midnight(2026, 8, 25);

    store
        .record_snapshot(subject, "view", 10, now - 2 * WEEK_SECS)
        .await
        .unwrap();
    let outcome = store.record_snapshot(subject, "view", 4, now).await.unwrap();

    assert_eq!(outcome.snapshot().delta_period1, Some(-6.0));
}

#[tokio::test]
async fn unchanged_count_on_same_date_is_a_noop() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();
    let date = midnight(2026, 8, 25);

    let first = store.record_snapshot(subject, "view", 9, date).await.unwrap();
    assert!(first.is_recorded());

    let second = store.record_snapshot(subject, "view", 9, date).await.unwrap();
    assert!(!second.is_recorded());
    assert_eq!(second.snapshot().id, first.snapshot().id);

    assert_eq!(store.history(subject, "view").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unchanged_count_on_a_later_date_still_writes() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();

    store
        .record_snapshot(subject, "view", 9, midnight(2026, 8, 18))
        .await
        .unwrap();
    let outcome = store
        .record_snapshot(subject, "view", 9, midnight(2026, 8, 25))
        .await
        .unwrap();

    // Advances the delta baseline even though the count is flat.
    assert!(outcome.is_recorded());
    assert_eq!(outcome.snapshot().delta_period1, Some(0.0));
    assert_eq!(store.history(subject, "view").await.unwrap().len(), 2);
}

#[tokio::test]
async fn metric_types_are_independent() {
    let store = memory_store().await;
    let subject = Uuid::new_v4();
    let date = midnight(2026, 8, 25);

    store.record_snapshot(subject, "view", 5, date).await.unwrap();
    store.record_snapshot(subject, "download", 2, date).await.unwrap();

    let view = store.latest(subject, "view").await.unwrap().unwrap();
    let download = store.latest(subject, "download").await.unwrap().unwrap();
    assert_eq!(view.count, 5);
    assert_eq!(download.count, 2);
    assert!(store.latest(subject, "wosCitation").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_is_last_rows_are_repaired() {
    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap(),
    );
    let store = SqliteSnapshotStore::with_pool(Arc::clone(&pool));
    store.init().await.unwrap();

    let subject = Uuid::new_v4();

    // Corrupt the table directly: two rows flagged authoritative.
    for (count, date) in [(3_i64, midnight(2026, 8, 10)), (4, midnight(2026, 8, 17))] {
        sqlx::query(
            "INSERT INTO metric_snapshots (subject_id, metric_type, count, acquisition_date, is_last) \
             VALUES (?, 'view', ?, ?, 1)",
        )
        .bind(subject.to_string())
        .bind(count)
        .bind(date)
        .execute(pool.as_ref())
        .await
        .unwrap();
    }

    let outcome = store
        .record_snapshot(subject, "view", 6, midnight(2026, 8, 25))
        .await
        .unwrap();
    assert!(outcome.is_recorded());

    let history = store.history(subject, "view").await.unwrap();
    assert_eq!(history.len(), 3);

    let last: Vec<_> = history.iter().filter(|s| s.is_last).collect();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].count, 6);

    // The stale duplicate was demoted with a remark; the delta baseline is
    // the most recent snapshot that is old enough (count=4 on Aug 17).
    assert!(history
        .iter()
        .any(|s| !s.is_last && s.remark.as_deref() == Some("repaired: duplicate last snapshot")));
    assert_eq!(outcome.snapshot().delta_period1, Some(2.0));
}

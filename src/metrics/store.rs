//! Metric snapshot persistence
//!
//! The demote-and-insert of the `is_last` flag runs as a single
//! `BEGIN IMMEDIATE` transaction so a concurrent reader can never observe
//! zero or two authoritative snapshots for one (subject, metric type) key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::metrics::models::{MetricSnapshot, SnapshotOutcome};

/// Period-1 delta baseline distance
pub const WEEK_SECS: i64 = 7 * 86_400;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Initialize the store (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Record a recomputed counter for (subject_id, metric_type).
    ///
    /// Demotes the previous authoritative snapshot and inserts the new one
    /// atomically, computing week/month trend deltas against the nearest
    /// snapshots at least 7 days (resp. 1 calendar month) older. Recording
    /// an unchanged count on the same acquisition date is a no-op.
    async fn record_snapshot(
        &self,
        subject_id: Uuid,
        metric_type: &str,
        new_count: i64,
        acquisition_date: i64,
    ) -> Result<SnapshotOutcome>;

    /// Current authoritative snapshot for the key, if any
    async fn latest(&self, subject_id: Uuid, metric_type: &str) -> Result<Option<MetricSnapshot>>;

    /// All snapshots for the key, oldest first
    async fn history(&self, subject_id: Uuid, metric_type: &str) -> Result<Vec<MetricSnapshot>>;
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    subject_id: String,
    metric_type: String,
    count: i64,
    acquisition_date: i64,
    is_last: i64,
    delta_period1: Option<f64>,
    delta_period2: Option<f64>,
    remark: Option<String>,
}

impl SnapshotRow {
    fn into_model(self) -> Result<MetricSnapshot> {
        let subject_id = Uuid::parse_str(&self.subject_id)
            .with_context(|| format!("malformed subject id '{}' in snapshot store", self.subject_id))?;
        Ok(MetricSnapshot {
            id: self.id,
            subject_id,
            metric_type: self.metric_type,
            count: self.count,
            acquisition_date: self.acquisition_date,
            is_last: self.is_last != 0,
            delta_period1: self.delta_period1,
            delta_period2: self.delta_period2,
            remark: self.remark,
        })
    }
}

pub struct SqliteSnapshotStore {
    pool: Arc<SqlitePool>,
}

impl SqliteSnapshotStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn with_pool(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

/// Most recent snapshot at least as old as `cutoff` for the key
async fn baseline_count(
    conn: &mut SqliteConnection,
    subject_id: &str,
    metric_type: &str,
    cutoff: i64,
) -> Result<Option<i64>> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT count FROM metric_snapshots
        WHERE subject_id = ? AND metric_type = ? AND acquisition_date <= ?
        ORDER BY acquisition_date DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(subject_id)
    .bind(metric_type)
    .bind(cutoff)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(count)
}

/// One calendar month before `ts`
fn month_before(ts: i64) -> i64 {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .and_then(|dt| dt.checked_sub_months(Months::new(1)))
        .map(|dt| dt.timestamp())
        .unwrap_or(ts - 30 * 86_400)
}

async fn record_in_tx(
    conn: &mut SqliteConnection,
    subject_id: Uuid,
    metric_type: &str,
    new_count: i64,
    acquisition_date: i64,
) -> Result<SnapshotOutcome> {
    let subject = subject_id.to_string();

    let last_rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, subject_id, metric_type, count, acquisition_date,
               is_last, delta_period1, delta_period2, remark
        FROM metric_snapshots
        WHERE subject_id = ? AND metric_type = ? AND is_last = 1
        ORDER BY acquisition_date DESC, id DESC
        "#,
    )
    .bind(&subject)
    .bind(metric_type)
    .fetch_all(&mut *conn)
    .await?;

    // Data-integrity fault: more than one row flagged authoritative.
    // Keep the most recent, demote the rest, and say so in the log.
    if last_rows.len() > 1 {
        error!(
            subject = %subject,
            metric = metric_type,
            observed = last_rows.len(),
            "multiple snapshots flagged is_last; repairing"
        );
        for stale in &last_rows[1..] {
            sqlx::query(
                "UPDATE metric_snapshots SET is_last = 0, remark = ? WHERE id = ?",
            )
            .bind("repaired: duplicate last snapshot")
            .bind(stale.id)
            .execute(&mut *conn)
            .await?;
        }
    }

    let prev = last_rows.into_iter().next();

    if let Some(ref p) = prev {
        if p.count == new_count && p.acquisition_date == acquisition_date {
            let existing = sqlx::query_as::<_, SnapshotRow>(
                r#"
                SELECT id, subject_id, metric_type, count, acquisition_date,
                       is_last, delta_period1, delta_period2, remark
                FROM metric_snapshots WHERE id = ?
                "#,
            )
            .bind(p.id)
            .fetch_one(&mut *conn)
            .await?;
            return Ok(SnapshotOutcome::Unchanged(existing.into_model()?));
        }
    }

    let week_ago = baseline_count(conn, &subject, metric_type, acquisition_date - WEEK_SECS).await?;
    let month_ago = baseline_count(conn, &subject, metric_type, month_before(acquisition_date)).await?;

    let delta_period1 = week_ago.map(|base| (new_count - base) as f64);
    let delta_period2 = month_ago.map(|base| (new_count - base) as f64);

    if let Some(ref p) = prev {
        sqlx::query("UPDATE metric_snapshots SET is_last = 0 WHERE id = ?")
            .bind(p.id)
            .execute(&mut *conn)
            .await?;
    }

    let result = sqlx::query(
        r#"
        INSERT INTO metric_snapshots
            (subject_id, metric_type, count, acquisition_date, is_last,
             delta_period1, delta_period2, remark)
        VALUES (?, ?, ?, ?, 1, ?, ?, NULL)
        "#,
    )
    .bind(&subject)
    .bind(metric_type)
    .bind(new_count)
    .bind(acquisition_date)
    .bind(delta_period1)
    .bind(delta_period2)
    .execute(&mut *conn)
    .await?;

    Ok(SnapshotOutcome::Recorded(MetricSnapshot {
        id: result.last_insert_rowid(),
        subject_id,
        metric_type: metric_type.to_string(),
        count: new_count,
        acquisition_date,
        is_last: true,
        delta_period1,
        delta_period2,
        remark: None,
    }))
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metric_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL,
                metric_type TEXT NOT NULL,
                count INTEGER NOT NULL,
                acquisition_date INTEGER NOT NULL,
                is_last INTEGER NOT NULL DEFAULT 0,
                delta_period1 REAL,
                delta_period2 REAL,
                remark TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_last ON metric_snapshots(subject_id, metric_type, is_last)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_date ON metric_snapshots(subject_id, metric_type, acquisition_date)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_snapshot(
        &self,
        subject_id: Uuid,
        metric_type: &str,
        new_count: i64,
        acquisition_date: i64,
    ) -> Result<SnapshotOutcome> {
        let mut conn = self.pool.acquire().await?;

        // IMMEDIATE takes the write lock up front so two pipeline runs
        // cannot both observe the same prior is_last row.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(conn.as_mut())
            .await?;

        match record_in_tx(conn.as_mut(), subject_id, metric_type, new_count, acquisition_date).await
        {
            Ok(outcome) => {
                sqlx::query("COMMIT").execute(conn.as_mut()).await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(conn.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn latest(&self, subject_id: Uuid, metric_type: &str) -> Result<Option<MetricSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, subject_id, metric_type, count, acquisition_date,
                   is_last, delta_period1, delta_period2, remark
            FROM metric_snapshots
            WHERE subject_id = ? AND metric_type = ? AND is_last = 1
            ORDER BY acquisition_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id.to_string())
        .bind(metric_type)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(SnapshotRow::into_model).transpose()
    }

    async fn history(&self, subject_id: Uuid, metric_type: &str) -> Result<Vec<MetricSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, subject_id, metric_type, count, acquisition_date,
                   is_last, delta_period1, delta_period2, remark
            FROM metric_snapshots
            WHERE subject_id = ? AND metric_type = ?
            ORDER BY acquisition_date ASC, id ASC
            "#,
        )
        .bind(subject_id.to_string())
        .bind(metric_type)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(SnapshotRow::into_model).collect()
    }
}

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::index::{Dimension, DimensionBucket, UsageIndex, UsageQuery};
use crate::ingest::ViewEvent;

pub struct SqliteUsageIndex {
    pool: Arc<SqlitePool>,
}

impl SqliteUsageIndex {
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

fn push_filters(sql: &mut String, query: &UsageQuery) {
    if query.subject_type.is_some() {
        sql.push_str(" AND subject_type = ?");
    }
    if query.subject_id.is_some() {
        sql.push_str(" AND subject_id = ?");
    }
    if query.start_time.is_some() {
        sql.push_str(" AND ts >= ?");
    }
    if query.end_time.is_some() {
        sql.push_str(" AND ts < ?");
    }
    if query.downloads_only {
        sql.push_str(" AND is_download = 1");
    }
}

#[async_trait]
impl UsageIndex for SqliteUsageIndex {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_type TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                country_code TEXT,
                country_name TEXT,
                city TEXT,
                client_ip TEXT,
                is_download INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_subject ON usage_events(subject_id, ts)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type_ts ON usage_events(subject_type, ts)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn record_batch(&self, events: Vec<ViewEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO usage_events
                    (subject_type, subject_id, ts, country_code, country_name, city, client_ip, is_download)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.subject_type.to_string())
            .bind(event.subject_id.to_string())
            .bind(event.timestamp)
            .bind(event.geo.country_code)
            .bind(event.geo.country_name)
            .bind(event.geo.city)
            .bind(event.client_ip.map(|ip| ip.to_string()))
            .bind(event.is_download as i64)
            .execute(tx.as_mut())
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, query: &UsageQuery) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM usage_events WHERE 1=1");
        push_filters(&mut sql, query);

        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(st) = query.subject_type {
            q = q.bind(st.to_string());
        }
        if let Some(id) = query.subject_id {
            q = q.bind(id.to_string());
        }
        if let Some(start) = query.start_time {
            q = q.bind(start);
        }
        if let Some(end) = query.end_time {
            q = q.bind(end);
        }

        let count = q.fetch_one(self.pool.as_ref()).await?;
        Ok(count)
    }

    async fn group_by(
        &self,
        dimension: Dimension,
        query: &UsageQuery,
        limit: Option<i64>,
    ) -> Result<Vec<DimensionBucket>> {
        let mut sql = match dimension {
            Dimension::Country => String::from(
                "SELECT country_code AS dim_key, MAX(country_name) AS dim_label, COUNT(*) AS views \
                 FROM usage_events WHERE country_code IS NOT NULL",
            ),
            Dimension::City => String::from(
                "SELECT city AS dim_key, NULL AS dim_label, COUNT(*) AS views \
                 FROM usage_events WHERE city IS NOT NULL",
            ),
        };
        push_filters(&mut sql, query);

        match dimension {
            Dimension::Country => sql.push_str(" GROUP BY country_code"),
            Dimension::City => sql.push_str(" GROUP BY city"),
        }
        sql.push_str(" ORDER BY views DESC, dim_key ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query_as::<_, DimensionBucket>(&sql);
        if let Some(st) = query.subject_type {
            q = q.bind(st.to_string());
        }
        if let Some(id) = query.subject_id {
            q = q.bind(id.to_string());
        }
        if let Some(start) = query.start_time {
            q = q.bind(start);
        }
        if let Some(end) = query.end_time {
            q = q.bind(end);
        }
        if let Some(limit) = limit {
            q = q.bind(limit);
        }

        let buckets = q.fetch_all(self.pool.as_ref()).await?;
        Ok(buckets)
    }
}

//! Usage index abstraction
//!
//! The index is a searchable store of ingested events, queryable by subject,
//! date range, and geo dimension. Any backend satisfying `count`/`group_by`
//! works; a SQLite implementation is provided for stand-alone deployments
//! and tests.

pub mod sqlite;

pub use sqlite::SqliteUsageIndex;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::hierarchy::SubjectType;
use crate::ingest::ViewEvent;

/// Facet dimension events can be grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Country,
    City,
}

/// Filter for count/group-by queries
#[derive(Debug, Clone, Default)]
pub struct UsageQuery {
    pub subject_type: Option<SubjectType>,
    pub subject_id: Option<Uuid>,

    /// Start time, inclusive (Unix timestamp)
    pub start_time: Option<i64>,

    /// End time, exclusive (Unix timestamp)
    pub end_time: Option<i64>,

    /// Restrict to events flagged as downloads
    pub downloads_only: bool,
}

impl UsageQuery {
    pub fn subject(subject_type: SubjectType, subject_id: Uuid) -> Self {
        Self {
            subject_type: Some(subject_type),
            subject_id: Some(subject_id),
            ..Default::default()
        }
    }

    pub fn downloads(subject_type: SubjectType, subject_id: Uuid) -> Self {
        Self {
            downloads_only: true,
            ..Self::subject(subject_type, subject_id)
        }
    }

    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }
}

/// One group-by bucket: distinct dimension value with its visit count
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DimensionBucket {
    #[sqlx(rename = "dim_key")]
    pub key: String,

    #[sqlx(rename = "dim_label")]
    pub label: Option<String>,

    #[sqlx(rename = "views")]
    pub count: i64,
}

#[async_trait]
pub trait UsageIndex: Send + Sync {
    /// Initialize the index (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Append a batch of resolved events. Events are independent and
    /// append-only; no ordering requirement beyond their timestamps.
    async fn record_batch(&self, events: Vec<ViewEvent>) -> Result<()>;

    /// Count events matching the query
    async fn count(&self, query: &UsageQuery) -> Result<i64>;

    /// Group matching events by a geo dimension, descending by count.
    /// Events with no value for the dimension are excluded.
    async fn group_by(
        &self,
        dimension: Dimension,
        query: &UsageQuery,
        limit: Option<i64>,
    ) -> Result<Vec<DimensionBucket>>;
}

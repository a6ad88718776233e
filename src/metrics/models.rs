//! Metric snapshot models

use serde::Serialize;
use uuid::Uuid;

/// Metric type recorded for every subject
pub const METRIC_VIEW: &str = "view";

/// Metric type recorded for items and bitstreams
pub const METRIC_DOWNLOAD: &str = "download";

/// One persisted, timestamped metric value with trend deltas.
///
/// At most one snapshot per (subject_id, metric_type) carries
/// `is_last = true` at any time; it is the authoritative current value.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub id: i64,
    pub subject_id: Uuid,
    pub metric_type: String,
    pub count: i64,

    /// Acquisition date (Unix timestamp, midnight UTC)
    pub acquisition_date: i64,

    pub is_last: bool,

    /// Change versus the nearest snapshot at least a week older
    pub delta_period1: Option<f64>,

    /// Change versus the nearest snapshot at least a calendar month older
    pub delta_period2: Option<f64>,

    pub remark: Option<String>,
}

/// Result of a `record_snapshot` call
#[derive(Debug, Clone)]
pub enum SnapshotOutcome {
    /// A new authoritative snapshot was written
    Recorded(MetricSnapshot),

    /// The current snapshot already carries this count for this acquisition
    /// date; nothing was written
    Unchanged(MetricSnapshot),
}

impl SnapshotOutcome {
    pub fn snapshot(&self) -> &MetricSnapshot {
        match self {
            SnapshotOutcome::Recorded(s) | SnapshotOutcome::Unchanged(s) => s,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, SnapshotOutcome::Recorded(_))
    }
}

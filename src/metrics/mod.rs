//! Persisted metric counters with trend deltas

pub mod models;
pub mod pipeline;
pub mod store;

pub use models::{MetricSnapshot, SnapshotOutcome, METRIC_DOWNLOAD, METRIC_VIEW};
pub use pipeline::{MetricUpdatePipeline, PipelineSummary};
pub use store::{SnapshotStore, SqliteSnapshotStore, WEEK_SECS};

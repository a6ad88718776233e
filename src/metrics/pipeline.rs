//! Metric update pipeline
//!
//! Periodic batch job: recompute the current counters for every subject
//! from the usage index and persist them as snapshots. A write failure
//! aborts only that subject's update; the batch continues and the failure
//! is counted in the summary returned to the caller.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::hierarchy::{ContentArena, ContentNode, SubjectType};
use crate::index::{UsageIndex, UsageQuery};
use crate::metrics::models::{METRIC_DOWNLOAD, METRIC_VIEW};
use crate::metrics::store::SnapshotStore;

/// Per-run outcome counts, surfaced to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    /// New snapshots written
    pub recorded: usize,

    /// Counters whose current snapshot already matched (no-op)
    pub unchanged: usize,

    /// Counters with zero events and no prior metric (nothing to write)
    pub skipped: usize,

    /// Subjects whose update failed
    pub failed: usize,
}

pub struct MetricUpdatePipeline {
    index: Arc<dyn UsageIndex>,
    store: Arc<dyn SnapshotStore>,
    arena: Arc<ContentArena>,
}

impl MetricUpdatePipeline {
    pub fn new(
        index: Arc<dyn UsageIndex>,
        store: Arc<dyn SnapshotStore>,
        arena: Arc<ContentArena>,
    ) -> Self {
        Self {
            index,
            store,
            arena,
        }
    }

    /// Run one batch over every subject in the hierarchy.
    ///
    /// `now` is a Unix timestamp; snapshots are dated to its UTC midnight.
    pub async fn run(&self, now: i64) -> PipelineSummary {
        let acquisition_date = now - now.rem_euclid(86_400);
        let mut summary = PipelineSummary::default();

        for node in self.arena.iter() {
            if let Err(e) = self.update_subject(node, acquisition_date, &mut summary).await {
                error!(
                    subject = %node.id,
                    subject_type = %node.subject_type,
                    "metric update failed: {e:#}"
                );
                summary.failed += 1;
            }
        }

        info!(
            recorded = summary.recorded,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            failed = summary.failed,
            "metric update pipeline finished"
        );
        summary
    }

    async fn update_subject(
        &self,
        node: &ContentNode,
        acquisition_date: i64,
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        let views = self
            .index
            .count(&UsageQuery::subject(node.subject_type, node.id))
            .await?;
        self.apply(node, METRIC_VIEW, views, acquisition_date, summary)
            .await?;

        let downloads = match node.subject_type {
            SubjectType::Item => {
                let mut total = 0;
                for bitstream in self.arena.bitstreams_of(node.id) {
                    total += self
                        .index
                        .count(&UsageQuery::downloads(SubjectType::Bitstream, bitstream.id))
                        .await?;
                }
                Some(total)
            }
            SubjectType::Bitstream => Some(
                self.index
                    .count(&UsageQuery::downloads(SubjectType::Bitstream, node.id))
                    .await?,
            ),
            _ => None,
        };

        if let Some(downloads) = downloads {
            self.apply(node, METRIC_DOWNLOAD, downloads, acquisition_date, summary)
                .await?;
        }

        Ok(())
    }

    async fn apply(
        &self,
        node: &ContentNode,
        metric_type: &str,
        count: i64,
        acquisition_date: i64,
        summary: &mut PipelineSummary,
    ) -> Result<()> {
        // Zero events and no prior metric: absence is a valid terminal
        // state, distinct from a metric with count 0.
        if count == 0 && self.store.latest(node.id, metric_type).await?.is_none() {
            summary.skipped += 1;
            return Ok(());
        }

        let outcome = self
            .store
            .record_snapshot(node.id, metric_type, count, acquisition_date)
            .await?;

        if outcome.is_recorded() {
            summary.recorded += 1;
        } else {
            summary.unchanged += 1;
        }
        Ok(())
    }
}

//! Run cancellation.
//!
//! The status flips first, so any in-flight handler that checks the run
//! afterwards stops working on it. Pending jobs of the run are then removed
//! from every stage queue. Jobs already running finish their current unit
//! and skip the handoff.

use serde::Serialize;
use tracing::{info, instrument};

use super::PipelineContext;
use super::jobs::payload_run_id;
use crate::queue::JobState;
use crate::storage::Database;
use crate::types::{IngestError, Result, RunStatus, Stage};

/// Outcome of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    /// The run moved to CANCELLED with this call
    pub cancelled: bool,
    /// Pending jobs removed across all stage queues
    pub removed: usize,
}

/// Move a stored run to CANCELLED. Returns whether the status changed.
///
/// Workers of any process sharing the database skip the run's remaining
/// jobs once this returns.
pub fn mark_cancelled(db: &Database, run_id: &str) -> Result<bool> {
    if db.run_status(run_id)?.is_none() {
        return Err(IngestError::NotFound(format!("run {}", run_id)));
    }
    db.update_run_status(run_id, RunStatus::Cancelled, None)
}

#[instrument(skip(ctx))]
pub(crate) async fn cancel_run(ctx: &PipelineContext, run_id: &str) -> Result<CancelReport> {
    let cancelled = mark_cancelled(&ctx.db, run_id)?;

    let mut removed = 0;
    for stage in Stage::ALL {
        removed += ctx
            .queue
            .remove_jobs(
                stage.queue_name(),
                |payload| payload_run_id(payload) == Some(run_id),
                &[JobState::Waiting, JobState::Delayed],
            )
            .await;
    }
    ctx.counters.clear_run(run_id).await?;

    if cancelled {
        ctx.publish(run_id, RunStatus::Cancelled, "cancelled by request");
    }
    info!(cancelled, removed, "Cancel processed");
    Ok(CancelReport { cancelled, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::jobs::{self, CrawlJob};
    use crate::pipeline::testing::{Harness, summary_answer};

    async fn enqueue_dirs(harness: &Harness, run_id: &str, paths: &[&str]) {
        for path in paths {
            let job = CrawlJob {
                run_id: run_id.to_string(),
                owner: "octo".to_string(),
                repo: "demo".to_string(),
                path: path.to_string(),
                directory_id: None,
            };
            harness
                .ctx
                .queue
                .enqueue("crawl", jobs::to_payload(&job).unwrap(), harness.ctx.job_options())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancel_removes_only_target_jobs() {
        let harness = Harness::new(&[], summary_answer);
        let target = harness.processing_run().await;
        let other = harness.processing_run().await;
        enqueue_dirs(&harness, &target, &["a", "b"]).await;
        enqueue_dirs(&harness, &other, &["c"]).await;

        let report = cancel_run(&harness.ctx, &target).await.unwrap();
        assert_eq!(report, CancelReport { cancelled: true, removed: 2 });
        assert_eq!(harness.ctx.queue.counts("crawl").await.waiting, 1);
        assert_eq!(
            harness.ctx.db.run_status(&target).unwrap(),
            Some(RunStatus::Cancelled)
        );
        assert_eq!(
            harness.ctx.db.run_status(&other).unwrap(),
            Some(RunStatus::Processing)
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let harness = Harness::new(&[], summary_answer);
        let run_id = harness.processing_run().await;
        enqueue_dirs(&harness, &run_id, &["a"]).await;

        cancel_run(&harness.ctx, &run_id).await.unwrap();
        let again = cancel_run(&harness.ctx, &run_id).await.unwrap();
        assert_eq!(again, CancelReport { cancelled: false, removed: 0 });
    }

    #[tokio::test]
    async fn test_cancel_keeps_terminal_status() {
        let harness = Harness::new(&[], summary_answer);
        let run_id = harness.processing_run().await;
        harness.ctx.mark_failed(&run_id, "boom");

        let report = cancel_run(&harness.ctx, &run_id).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(
            harness.ctx.db.run_status(&run_id).unwrap(),
            Some(RunStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let harness = Harness::new(&[], summary_answer);
        assert!(matches!(
            cancel_run(&harness.ctx, "missing").await,
            Err(IngestError::NotFound(_))
        ));
    }
}

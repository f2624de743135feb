//! Run lifecycle: start, stage handoff, terminal transitions, status.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

use super::jobs::{self, CrawlJob};
use super::{PipelineContext, batch, overview};
use crate::progress::{CounterStore, StageProgress};
use crate::source::RepoLocator;
use crate::storage::{Database, RunCounts};
use crate::types::{IngestError, PipelineRun, Result, RunId, RunStatus, Stage};

/// Point-in-time view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: PipelineRun,
    pub counts: RunCounts,
    pub stages: Vec<StageSnapshot>,
    pub has_overview: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    /// `None` once the stage drained or before it started
    pub progress: Option<StageProgress>,
}

impl PipelineContext {
    /// Create a run and enqueue its root crawl job.
    ///
    /// An unparseable locator fails the run immediately.
    #[instrument(skip(self))]
    pub async fn start_run(&self, source_locator: &str) -> Result<String> {
        let run_id = RunId::generate().into_inner();
        self.db.create_run(&run_id, source_locator)?;
        info!(run_id = %run_id, "Run created");

        let locator = match RepoLocator::parse(source_locator) {
            Ok(locator) => locator,
            Err(e) => {
                self.mark_failed(&run_id, &e.to_string());
                return Err(e);
            }
        };

        self.db
            .update_run_status(&run_id, RunStatus::Processing, None)?;
        self.counters.incr_total(&run_id, Stage::Crawl, 1).await?;

        let root = CrawlJob {
            run_id: run_id.clone(),
            owner: locator.owner.clone(),
            repo: locator.repo.clone(),
            path: String::new(),
            directory_id: None,
        };
        let enqueued = match jobs::to_payload(&root) {
            Ok(payload) => {
                self.queue
                    .enqueue(Stage::Crawl.queue_name(), payload, self.job_options())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = enqueued {
            self.mark_error(&run_id, &format!("failed to enqueue root crawl: {}", e));
            return Err(e);
        }

        self.publish(
            &run_id,
            RunStatus::Processing,
            format!("crawl started for {}", locator),
        );
        Ok(run_id)
    }

    /// Called by the single worker that observed `drained` complete.
    ///
    /// Starts the next stage, or finishes the run. A run no longer
    /// PROCESSING gets its counters cleared instead of a handoff.
    pub(crate) async fn advance(&self, run_id: &str, drained: Stage) -> Result<()> {
        let mut drained = drained;
        loop {
            if self.db.run_status(run_id)? != Some(RunStatus::Processing) {
                debug!(run_id, stage = %drained, "Run is terminal, skipping handoff");
                self.counters.clear_run(run_id).await?;
                return Ok(());
            }

            info!(run_id, stage = %drained, "Stage drained");
            let next = match drained {
                Stage::Crawl => Stage::Summary,
                Stage::Summary => {
                    if !overview::generate(self, run_id).await? {
                        return Ok(());
                    }
                    Stage::Analysis
                }
                Stage::Analysis => {
                    self.mark_success(run_id)?;
                    return Ok(());
                }
            };

            if batch::start_stage(self, run_id, next).await? {
                return Ok(());
            }
            // Nothing eligible: the stage is drained already
            drained = next;
        }
    }

    /// Handoff wrapper for workers: a failed handoff is a coordinator fault.
    pub(crate) async fn advance_or_error(&self, run_id: &str, drained: Stage) {
        if let Err(e) = self.advance(run_id, drained).await {
            error!(run_id, stage = %drained, error = %e, "Stage handoff failed");
            self.mark_error(run_id, &format!("handoff after {} failed: {}", drained, e));
        }
    }

    // =========================================================================
    // Terminal Transitions
    // =========================================================================

    /// Move the run to FAILED and publish it. No-op on terminal runs.
    pub fn mark_failed(&self, run_id: &str, message: &str) -> bool {
        self.transition(run_id, RunStatus::Failed, Some(message), message)
    }

    /// Move the run to ERROR (coordinator fault) and publish it.
    pub fn mark_error(&self, run_id: &str, message: &str) -> bool {
        self.transition(run_id, RunStatus::Error, Some(message), message)
    }

    pub fn mark_success(&self, run_id: &str) -> Result<bool> {
        let counts = self.db.run_counts(run_id)?;
        let changed = self
            .db
            .update_run_status(run_id, RunStatus::Success, None)?;
        if changed {
            info!(
                run_id,
                files = counts.files,
                summarized = counts.summarized,
                analyzed = counts.analyzed,
                "Run completed"
            );
            self.publish(
                run_id,
                RunStatus::Success,
                format!(
                    "completed: {} files, {} summarized, {} analyzed",
                    counts.files, counts.summarized, counts.analyzed
                ),
            );
        }
        Ok(changed)
    }

    fn transition(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        message: &str,
    ) -> bool {
        match self.db.update_run_status(run_id, status, error_message) {
            Ok(true) => {
                warn!(run_id, status = %status, message, "Run stopped");
                self.publish(run_id, status, message);
                true
            }
            Ok(false) => {
                debug!(run_id, status = %status, "Run already terminal");
                false
            }
            Err(e) => {
                error!(run_id, status = %status, error = %e, "Failed to record run transition");
                false
            }
        }
    }

    pub fn publish(&self, run_id: &str, status: RunStatus, message: impl Into<String>) {
        self.notifier.publish(run_id, status, message);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn status(&self, run_id: &str) -> Result<RunSummary> {
        run_summary(&self.db, self.counters.as_ref(), run_id).await
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait_for_completion(&self, run_id: &str, timeout: Duration) -> Result<RunStatus> {
        // Subscribe before the first read so no transition slips between them
        let mut updates = self.notifier.subscribe();

        let wait = async {
            loop {
                let status = self
                    .db
                    .run_status(run_id)?
                    .ok_or_else(|| IngestError::NotFound(format!("run {}", run_id)))?;
                if status.is_terminal() {
                    return Ok(status);
                }

                loop {
                    match updates.recv().await {
                        Ok(update) if update.run_id == run_id => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => {
                            return Err(IngestError::Queue("notification channel closed".into()));
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| IngestError::Timeout {
                operation: format!("waiting for run {}", run_id),
                duration: timeout,
            })?
    }
}

/// Status of a run straight from storage and the counter store.
///
/// Usable without a running pipeline, e.g. from another process sharing the
/// database.
pub async fn run_summary(
    db: &Database,
    counters: &dyn CounterStore,
    run_id: &str,
) -> Result<RunSummary> {
    let run = db
        .get_run(run_id)?
        .ok_or_else(|| IngestError::NotFound(format!("run {}", run_id)))?;
    let counts = db.run_counts(run_id)?;

    let mut stages = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        stages.push(StageSnapshot {
            stage,
            progress: counters.snapshot(run_id, stage).await?,
        });
    }

    Ok(RunSummary {
        has_overview: run.overview.is_some(),
        run,
        counts,
        stages,
    })
}

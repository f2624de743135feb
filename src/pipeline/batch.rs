//! Batch summary and analysis stages.
//!
//! `start_stage` splits the eligible files of a run into batches, resets the
//! stage counters to the batch count and enqueues one job per batch. Each
//! job calls the AI under the quota guard and retry policy, validates the
//! reply against the batch, persists it in one transaction, then counts the
//! batch and runs the drain check.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::jobs::{self, BatchJob};
use super::{PipelineContext, SharedContext};
use crate::ai::{BatchSchema, PromptTemplates};
use crate::queue::{JobContext, JobHandler};
use crate::types::{FileNode, IngestError, Result, RunStatus, Stage, estimate_code_tokens};

/// Enqueue the batches of `stage` for a run.
///
/// Returns `false` when no file is eligible, which means the stage is
/// already drained and the caller should advance past it.
#[instrument(skip(ctx))]
pub(crate) async fn start_stage(ctx: &PipelineContext, run_id: &str, stage: Stage) -> Result<bool> {
    let paths = ctx.db.eligible_file_paths(run_id, stage)?;
    let size = ctx.batch_size(stage);
    let batches: Vec<&[String]> = paths.chunks(size).collect();

    if batches.is_empty() {
        info!("No eligible files");
        ctx.publish(
            run_id,
            RunStatus::Processing,
            format!("{} skipped: no eligible files", stage),
        );
        return Ok(false);
    }

    ctx.counters
        .reset(run_id, stage, batches.len() as u64)
        .await?;

    for (index, batch) in batches.iter().enumerate() {
        let job = BatchJob {
            run_id: run_id.to_string(),
            stage,
            batch_id: format!("{}-{}", stage, index),
            paths: batch.to_vec(),
        };
        ctx.queue
            .enqueue(stage.queue_name(), jobs::to_payload(&job)?, ctx.job_options())
            .await?;
    }

    info!(files = paths.len(), batches = batches.len(), "Stage started");
    ctx.publish(
        run_id,
        RunStatus::Processing,
        format!(
            "{} started: {} files in {} batches",
            stage,
            paths.len(),
            batches.len()
        ),
    );
    Ok(true)
}

// =============================================================================
// Handler
// =============================================================================

/// Worker for both batch queues; the payload names the stage
pub struct BatchHandler {
    ctx: SharedContext,
}

impl BatchHandler {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for BatchHandler {
    async fn handle(&self, attempt: JobContext, payload: Value) -> Result<()> {
        let job: BatchJob = jobs::from_payload(payload)?;
        process_batch(&self.ctx, &job, &attempt).await
    }
}

#[instrument(
    skip_all,
    fields(run_id = %job.run_id, stage = %job.stage, batch = %job.batch_id, attempt = attempt.attempt)
)]
pub(crate) async fn process_batch(
    ctx: &PipelineContext,
    job: &BatchJob,
    attempt: &JobContext,
) -> Result<()> {
    match ctx.db.run_status(&job.run_id)? {
        None => {
            warn!("Batch job for unknown run, dropping");
            return Ok(());
        }
        Some(status) if status.is_terminal() => {
            debug!(status = %status, "Run is terminal, skipping batch");
            return finish_unit(ctx, job).await;
        }
        Some(_) => {}
    }

    match run_batch(ctx, job).await {
        Ok(stored) => {
            info!(stored, files = job.paths.len(), "Batch persisted");
            finish_unit(ctx, job).await
        }
        Err(e) if e.is_recoverable() && !attempt.is_final_attempt() => {
            warn!(error = %e, category = %e.category(), "Batch failed, queue will retry");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, category = %e.category(), "Batch failed permanently");
            ctx.mark_failed(
                &job.run_id,
                &format!("{} batch {} failed: {}", job.stage, job.batch_id, e),
            );
            finish_unit(ctx, job).await?;
            Err(e)
        }
    }
}

/// Call the AI for the batch's pending files and persist the results.
async fn run_batch(ctx: &PipelineContext, job: &BatchJob) -> Result<usize> {
    let schema = BatchSchema::for_stage(job.stage).ok_or_else(|| {
        IngestError::stage(&job.run_id, job.stage.as_str(), "not a batch stage")
    })?;

    // A redelivered batch may already be partly stored
    let pending: Vec<FileNode> = ctx
        .db
        .load_files(&job.run_id, &job.paths)?
        .into_iter()
        .filter(|file| match job.stage {
            Stage::Summary => file.short_summary.is_none(),
            _ => file.analysis.is_none(),
        })
        .collect();
    if pending.is_empty() {
        debug!("Nothing left to do in batch");
        return Ok(0);
    }

    let prompt = match job.stage {
        Stage::Summary => PromptTemplates::summary_batch(&pending),
        _ => {
            let overview = ctx.db.get_run(&job.run_id)?.and_then(|run| run.overview);
            PromptTemplates::analysis_batch(&pending, overview.as_deref())
        }
    };
    let expected: Vec<String> = pending.iter().map(|f| f.path.clone()).collect();
    let estimated_tokens = estimate_code_tokens(&prompt) as u64;

    let provider = &ctx.provider;
    let prompt = prompt.as_str();
    let expected = expected.as_slice();
    let results = ctx
        .retry
        .run(&ctx.quota, estimated_tokens, &job.batch_id, move |_| async move {
            let response = provider.complete(prompt).await?;
            let results = schema.validate(&response.text, expected)?;
            Ok::<_, IngestError>(results)
        })
        .await?;

    ctx.db.store_results(&job.run_id, job.stage, &results)
}

async fn finish_unit(ctx: &PipelineContext, job: &BatchJob) -> Result<()> {
    ctx.counters
        .incr_completed(&job.run_id, job.stage, &job.batch_id)
        .await?;

    if ctx.counters.try_complete(&job.run_id, job.stage).await? {
        ctx.advance_or_error(&job.run_id, job.stage).await;
    }
    Ok(())
}

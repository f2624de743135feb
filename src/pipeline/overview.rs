//! Project overview between the summary and analysis stages.
//!
//! Runs inline in the worker that drained the summary stage. The overview is
//! free text, so the only validation is that it is non-empty.

use tracing::{error, info, instrument};

use super::PipelineContext;
use crate::ai::PromptTemplates;
use crate::types::{
    IngestError, Result, RunStatus, ValidationError, ValidationErrorKind, estimate_tokens,
};

/// Generate and store the overview of a run.
///
/// Returns `false` when the run was failed instead, in which case the
/// analysis stage must not start. Storage errors propagate.
#[instrument(skip(ctx))]
pub(crate) async fn generate(ctx: &PipelineContext, run_id: &str) -> Result<bool> {
    let summaries = ctx.db.file_summaries(run_id)?;
    if summaries.is_empty() {
        info!("No summaries, skipping overview");
        return Ok(true);
    }

    let locator = ctx
        .db
        .get_run(run_id)?
        .map(|run| run.source_locator)
        .unwrap_or_default();
    let prompt = PromptTemplates::overview(&locator, &summaries);
    let estimated_tokens = estimate_tokens(&prompt) as u64;

    let provider = &ctx.provider;
    let prompt = prompt.as_str();
    let outcome = ctx
        .retry
        .run(&ctx.quota, estimated_tokens, "overview", move |_| async move {
            let response = provider.complete(prompt).await?;
            let text = response.text.trim();
            if text.is_empty() {
                return Err(IngestError::from(ValidationError::new(
                    ValidationErrorKind::Format,
                    "empty overview",
                )));
            }
            Ok(text.to_string())
        })
        .await;

    match outcome {
        Ok(overview) => {
            ctx.db.set_run_overview(run_id, &overview)?;
            info!(files = summaries.len(), chars = overview.len(), "Overview stored");
            ctx.publish(run_id, RunStatus::Processing, "overview generated");
            Ok(true)
        }
        Err(e) => {
            error!(error = %e, category = %e.category(), "Overview generation failed");
            ctx.mark_failed(run_id, &format!("overview generation failed: {}", e));
            Ok(false)
        }
    }
}

//! Cancel Command
//!
//! Marks a stored run CANCELLED. The coordinator running it skips the run's
//! remaining jobs when it next picks them up.

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::pipeline::mark_cancelled;
use crate::types::Result;

pub async fn run(run_id: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let output = Output::new();

    if mark_cancelled(&ctx.db, run_id)? {
        ctx.counters.clear_run(run_id).await?;
        output.success(&format!("Cancelled run {}", run_id));
    } else {
        let status = ctx
            .db
            .run_status(run_id)?
            .map(|s| s.to_string())
            .unwrap_or_default();
        output.warning(&format!("Run {} already finished ({})", run_id, status));
    }
    Ok(())
}

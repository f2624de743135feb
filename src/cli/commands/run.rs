//! Run Command
//!
//! Start a run and drive it to a terminal status. The task queue lives in
//! this process, so the command stays up until the run finishes; Ctrl-C
//! cancels the run instead of abandoning its jobs.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::pipeline::Pipeline;
use crate::types::{Result, RunStatus};

pub async fn run(locator: &str, timeout: Duration) -> Result<RunStatus> {
    let ctx = CommandContext::load()?;
    let pipeline = Pipeline::start(&ctx.config, ctx.services()?)?;
    let output = Output::new();

    // Subscribe first so the opening update is not missed
    let mut updates = pipeline.subscribe();
    let run_id = pipeline.start_run(locator).await?;
    output.info(&format!("Started run {} for {}", run_id, locator));

    let watched = run_id.clone();
    let printer = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) if update.run_id == watched => output.update(&update),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let status = tokio::select! {
        result = pipeline.wait_for_completion(&run_id, timeout) => result,
        _ = tokio::signal::ctrl_c() => {
            output.warning("Interrupted, cancelling run");
            let report = pipeline.cancel_run(&run_id).await?;
            output.info(&format!("Removed {} pending jobs", report.removed));
            Ok(RunStatus::Cancelled)
        }
    };
    printer.abort();

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            pipeline.shutdown();
            return Err(e);
        }
    };

    output.summary(&pipeline.status(&run_id).await?);
    pipeline.shutdown();
    Ok(status)
}

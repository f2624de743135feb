//! Status Command
//!
//! Show a stored run. Stage progress is only visible from another process
//! with the `sqlite` counter backend.

use crate::cli::CommandContext;
use crate::cli::ui::Output;
use crate::pipeline::run_summary;
use crate::types::Result;

pub async fn run(run_id: &str, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let summary = run_summary(&ctx.db, ctx.counters.as_ref(), run_id).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        Output::new().summary(&summary);
        if let Some(overview) = &summary.run.overview {
            Output::new().section("Overview");
            println!("{}", overview);
        }
    }
    Ok(())
}

use console::{StyledObject, style};

use crate::notify::RunUpdate;
use crate::pipeline::RunSummary;
use crate::types::RunStatus;

/// Styled terminal output
#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// One streamed progress update
    pub fn update(&self, update: &RunUpdate) {
        println!(
            "{} {} {}",
            style(update.timestamp.format("%H:%M:%S")).dim(),
            status_label(update.status),
            update.message
        );
    }

    pub fn summary(&self, summary: &RunSummary) {
        let run = &summary.run;
        self.section(&format!("Run {}", run.run_id));
        println!("  Source:     {}", run.source_locator);
        println!("  Status:     {}", status_label(run.status));
        if let Some(message) = &run.error_message {
            println!("  Error:      {}", style(message).red());
        }
        println!("  Updated:    {}", run.updated_at);
        println!();
        println!("  Files:      {}", summary.counts.files);
        println!("  Dirs:       {}", summary.counts.directories);
        println!("  Summarized: {}", summary.counts.summarized);
        println!("  Analyzed:   {}", summary.counts.analyzed);
        println!(
            "  Overview:   {}",
            if summary.has_overview { "yes" } else { "no" }
        );

        let active: Vec<_> = summary
            .stages
            .iter()
            .filter_map(|s| s.progress.map(|p| (s.stage, p)))
            .collect();
        if !active.is_empty() {
            println!();
            for (stage, progress) in active {
                println!(
                    "  {:<10}  {}/{}",
                    stage.as_str(),
                    progress.completed,
                    progress.total
                );
            }
        }
    }
}

fn status_label(status: RunStatus) -> StyledObject<&'static str> {
    let label = style(status.as_str());
    match status {
        RunStatus::Success => label.green().bold(),
        RunStatus::Failed | RunStatus::Error => label.red().bold(),
        RunStatus::Cancelled => label.yellow().bold(),
        RunStatus::Pending | RunStatus::Processing => label.cyan(),
    }
}

//! Config Command
//!
//! Usage:
//!   repoweave config show [-f json]
//!   repoweave config path
//!   repoweave config init [-g] [--force]

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the merged effective configuration, secrets masked
pub fn show(format: &str) -> Result<()> {
    ConfigLoader::show_config(format == "json")
}

pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Write the default config template
pub fn init(global: bool, force: bool) -> Result<()> {
    let output = Output::new();
    let (path, written) = ConfigLoader::init(global, force)?;
    if written {
        output.success(&format!("Wrote {}", path.display()));
    } else {
        output.info(&format!(
            "{} exists, pass --force to overwrite",
            path.display()
        ));
    }
    Ok(())
}

//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config ($XDG_CONFIG_HOME/repoweave/config.toml)
//! 3. Project config (.repoweave/config.toml)
//! 4. Environment variables (REPOWEAVE_*)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;

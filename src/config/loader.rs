//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config ($XDG_CONFIG_HOME/repoweave/config.toml)
//! 3. Project config (.repoweave/config.toml)
//! 4. Environment variables (REPOWEAVE_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{IngestError, Result};

const ENV_PREFIX: &str = "REPOWEAVE_";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_layered(
            Self::global_config_path().as_deref(),
            &Self::project_config_path(),
        )
    }

    /// Same chain as [`load`](Self::load) with explicit file locations
    pub fn load_layered(global: Option<&Path>, project: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        if project.exists() {
            debug!("Loading project config from: {}", project.display());
            figment = figment.merge(Toml::file(project));
        }

        // e.g. REPOWEAVE_LLM__MODEL -> llm.model
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| IngestError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| IngestError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (honours XDG_CONFIG_HOME)
    pub fn global_dir() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("repoweave"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    /// Project data directory (config and default database)
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".repoweave")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;
        println!("{}", Self::render(&config, as_json)?);
        Ok(())
    }

    /// Render a configuration with secrets masked
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        let mut masked = config.clone();
        if masked.llm.api_key.is_some() {
            masked.llm.api_key = Some("********".to_string());
        }
        if masked.source.token.is_some() {
            masked.source.token = Some("********".to_string());
        }

        if as_json {
            Ok(serde_json::to_string_pretty(&masked)?)
        } else {
            toml::to_string_pretty(&masked).map_err(|e| IngestError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write a default config file, global or project scoped.
    ///
    /// Returns the path and whether a file was written.
    pub fn init(global: bool, force: bool) -> Result<(PathBuf, bool)> {
        let path = if global {
            Self::global_config_path().ok_or_else(|| {
                IngestError::Config("Cannot determine global config directory".to_string())
            })?
        } else {
            Self::project_config_path()
        };
        let written = Self::init_at(&path, force)?;
        Ok((path, written))
    }

    /// Write the default config template to `path` unless it exists
    pub fn init_at(path: &Path, force: bool) -> Result<bool> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::default_config())?;
        info!("Created config: {}", path.display());
        Ok(true)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn default_config() -> String {
        r#"# repoweave configuration
# Project settings in .repoweave/config.toml override global ones.
# Every key can also be set as REPOWEAVE_<SECTION>__<KEY>.

version = "1.0"

[source]
api_base = "https://api.github.com"
timeout_secs = 60

[llm]
provider = "openai"
model = "gpt-4o-mini"
timeout_secs = 300
temperature = 0.0

[pipeline]
crawl_concurrency = 4
batch_concurrency = 2
attempts = 3
backoff_ms = 1000
summary_batch_size = 10
analysis_batch_size = 5

[quota]
requests_per_minute = 60
tokens_per_minute = 200000

[storage]
database_path = ".repoweave/repoweave.db"
counters = "memory"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::load_layered(None, &dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.version, "1.0");
    }

    #[test]
    fn test_project_overrides_global() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        fs::write(
            &global,
            "[pipeline]\nsummary_batch_size = 7\nanalysis_batch_size = 2\n",
        )
        .unwrap();
        fs::write(&project, "[pipeline]\nsummary_batch_size = 3\n").unwrap();

        let config = ConfigLoader::load_layered(Some(&global), &project).unwrap();
        assert_eq!(config.pipeline.summary_batch_size, 3);
        assert_eq!(config.pipeline.analysis_batch_size, 2);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[quota]\nrequests_per_minute = 0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_init_template_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".repoweave/config.toml");
        assert!(ConfigLoader::init_at(&path, false).unwrap());
        assert!(!ConfigLoader::init_at(&path, false).unwrap());

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_render_masks_secrets() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let rendered = ConfigLoader::render(&config, false).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_env_override() {
        let dir = TempDir::new().unwrap();
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("REPOWEAVE_QUOTA__WAIT_MS", "1234");
        }
        let config =
            ConfigLoader::load_layered(None, &dir.path().join("missing.toml")).unwrap();
        unsafe {
            std::env::remove_var("REPOWEAVE_QUOTA__WAIT_MS");
        }
        assert_eq!(config.quota.wait_ms, 1234);
    }
}

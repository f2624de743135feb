//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration, the database
//! and the production collaborators of a pipeline.

use std::sync::Arc;

use crate::ai::create_provider;
use crate::config::{Config, ConfigLoader};
use crate::notify::Notifier;
use crate::pipeline::Services;
use crate::progress::{SharedCounterStore, create_counter_store};
use crate::source::create_source;
use crate::storage::{Database, SharedDatabase};
use crate::types::Result;

/// Command execution context
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
    pub counters: SharedCounterStore,
}

impl CommandContext {
    /// Load the merged configuration and open (or create) the database.
    pub fn load() -> Result<Self> {
        Self::from_config(ConfigLoader::load()?)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let db = Database::open(&config.storage.database_path)?;
        db.initialize()?;
        let db = Arc::new(db);
        let counters = create_counter_store(config.storage.counters, &db);

        Ok(Self {
            config,
            db,
            counters,
        })
    }

    /// Production collaborators: hosting API lister and configured provider.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn services(&self) -> Result<Services> {
        Ok(Services {
            db: self.db.clone(),
            counters: self.counters.clone(),
            source: create_source(&self.config.source, &self.config.pipeline)?,
            provider: create_provider(&self.config.llm)?,
            notifier: Notifier::spawn(),
            clock: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_creates_database() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.database_path = dir.path().join("nested/runs.db");

        let ctx = CommandContext::from_config(config).unwrap();
        assert!(dir.path().join("nested/runs.db").exists());
        assert!(ctx.db.get_run("missing").unwrap().is_none());
    }
}

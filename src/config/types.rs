//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global and project (.repoweave/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;
use crate::types::{IngestError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Repository hosting API settings
    pub source: SourceConfig,

    /// LLM provider settings
    pub llm: LlmConfig,

    /// Stage concurrency, batching and retry settings
    pub pipeline: PipelineConfig,

    /// Per-minute AI budget
    pub quota: QuotaConfig,

    /// Database and counter backend settings
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            source: SourceConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            quota: QuotaConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `IngestError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(IngestError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(IngestError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        let positive = [
            ("pipeline.crawl_concurrency", self.pipeline.crawl_concurrency),
            ("pipeline.batch_concurrency", self.pipeline.batch_concurrency),
            ("pipeline.file_batch_size", self.pipeline.file_batch_size),
            ("pipeline.summary_batch_size", self.pipeline.summary_batch_size),
            ("pipeline.analysis_batch_size", self.pipeline.analysis_batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IngestError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.pipeline.attempts == 0 || self.pipeline.max_ai_attempts == 0 {
            return Err(IngestError::Config(
                "pipeline.attempts and pipeline.max_ai_attempts must be greater than 0".to_string(),
            ));
        }

        if self.quota.requests_per_minute == 0 || self.quota.tokens_per_minute == 0 {
            return Err(IngestError::Config(
                "quota limits must be greater than 0".to_string(),
            ));
        }

        for pattern in &self.pipeline.exclude {
            glob::Pattern::new(pattern).map_err(|e| {
                IngestError::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}

// =============================================================================
// Source Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the hosting API
    pub api_base: String,

    /// Access token (also read from GITHUB_TOKEN)
    pub token: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name
    pub provider: String,

    /// Model name
    pub model: String,

    /// API key (falls back to OPENAI_API_KEY)
    pub api_key: Option<String>,

    /// Custom base URL for OpenAI-compatible endpoints
    pub api_base: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Temperature for generation (0.0 = deterministic)
    pub temperature: f32,

    /// Completion token ceiling
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base: None,
            timeout_secs: constants::network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent crawl handlers
    pub crawl_concurrency: usize,

    /// Concurrent summary/analysis handlers (per stage)
    pub batch_concurrency: usize,

    /// Queue attempts per job
    pub attempts: u32,

    /// Queue backoff base in milliseconds
    pub backoff_ms: u64,

    /// Files per insert transaction
    pub file_batch_size: usize,

    /// Files per summary batch
    pub summary_batch_size: usize,

    /// Files per analysis batch
    pub analysis_batch_size: usize,

    /// In-handler AI call attempts
    pub max_ai_attempts: u32,

    /// Files above this size are not ingested
    pub max_file_bytes: u64,

    /// Glob patterns matched against repository paths
    pub exclude: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crawl_concurrency: constants::crawl::DEFAULT_CONCURRENCY,
            batch_concurrency: constants::batch::DEFAULT_CONCURRENCY,
            attempts: constants::queue::DEFAULT_ATTEMPTS,
            backoff_ms: constants::queue::DEFAULT_BACKOFF_MS,
            file_batch_size: constants::crawl::DEFAULT_FILE_BATCH_SIZE,
            summary_batch_size: constants::batch::DEFAULT_SUMMARY_BATCH_SIZE,
            analysis_batch_size: constants::batch::DEFAULT_ANALYSIS_BATCH_SIZE,
            max_ai_attempts: constants::batch::DEFAULT_MAX_AI_ATTEMPTS,
            max_file_bytes: constants::crawl::DEFAULT_MAX_FILE_BYTES,
            exclude: vec![
                "node_modules/**".to_string(),
                "dist/**".to_string(),
                ".git/**".to_string(),
                "target/**".to_string(),
                "vendor/**".to_string(),
                "**/*.lock".to_string(),
                "**/package-lock.json".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// =============================================================================
// Quota Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub requests_per_minute: u64,

    pub tokens_per_minute: u64,

    /// Wait between refused reservations (milliseconds, jitter added)
    pub wait_ms: u64,

    /// Sleep after a provider rate-limit response (milliseconds)
    pub backoff_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: constants::quota::DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute: constants::quota::DEFAULT_TOKENS_PER_MINUTE,
            wait_ms: constants::quota::DEFAULT_WAIT_MS,
            backoff_ms: constants::quota::DEFAULT_BACKOFF_MS,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Where stage counters and rate buckets live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    /// Process-local map (single coordinator)
    #[default]
    Memory,
    /// Shared database file (several coordinators)
    Sqlite,
}

impl std::fmt::Display for CounterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterBackend::Memory => write!(f, "memory"),
            CounterBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for CounterBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(CounterBackend::Memory),
            "sqlite" => Ok(CounterBackend::Sqlite),
            _ => Err(format!(
                "Unknown counter backend: {}. Valid values: memory, sqlite",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file (relative paths resolve against the working directory)
    pub database_path: PathBuf,

    pub counters: CounterBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".repoweave/repoweave.db"),
            counters: CounterBackend::Memory,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.provider, "openai");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.pipeline.summary_batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("summary_batch_size"));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_glob() {
        let mut config = Config::default();
        config.pipeline.exclude.push("[".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_counter_backend() {
        assert_eq!(CounterBackend::Sqlite.to_string(), "sqlite");
        assert_eq!(
            "memory".parse::<CounterBackend>().unwrap(),
            CounterBackend::Memory
        );
        assert!("redis".parse::<CounterBackend>().is_err());
    }
}

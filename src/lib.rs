//! repoweave - Staged AI Analysis of Source Repositories
//!
//! Crawls a hosted repository into SQLite, then runs two AI stages over the
//! stored files: a short summary per file, a project overview built from
//! those summaries, and a deeper analysis per file informed by the overview.
//!
//! ## Core Features
//!
//! - **Fan-out/fan-in stages**: one queue job per directory or file batch,
//!   with an atomic drain check that hands off to the next stage exactly once
//! - **Quota guard**: per-minute request and token budgets shared by every
//!   AI call, with provider rate-limit responses closing the window
//! - **Strict batch validation**: AI output is parsed, checked against the
//!   batch and stored atomically, or retried
//! - **Cooperative cancellation**: pending jobs are removed, running jobs
//!   observe the terminal status and stop handing off
//!
//! ## Quick Start
//!
//! ```ignore
//! use repoweave::{CommandContext, Pipeline};
//!
//! let ctx = CommandContext::load()?;
//! let pipeline = Pipeline::start(&ctx.config, ctx.services()?)?;
//! let run_id = pipeline.start_run("octo/demo").await?;
//! let status = pipeline.wait_for_completion(&run_id, timeout).await?;
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: run orchestration and the crawl, batch and overview stages
//! - [`queue`]: in-process task queue with retries and backoff
//! - [`progress`]: stage counters and rate buckets
//! - [`ai`]: provider abstraction, prompts, quota guard, retry, validation
//! - [`source`]: repository listing via the hosting API
//! - [`storage`]: SQLite persistence with connection pooling

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod source;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, CounterBackend};

// Error Types
pub use types::error::{ErrorCategory, IngestError, Result, ResultExt};

// Domain
pub use types::{FileNode, PipelineRun, RunId, RunStatus, Stage};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{Database, SharedDatabase};

// CLI context
pub use cli::CommandContext;

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use notify::{Notifier, RunUpdate};
pub use pipeline::{CancelReport, Pipeline, PipelineContext, RunSummary, Services};
pub use progress::{CounterStore, InMemoryCounterStore, SqliteCounterStore, StageProgress};
pub use queue::TaskQueue;

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{LlmProvider, LlmResponse, OpenAiProvider, QuotaGuard, RetryPolicy, create_provider};

// =============================================================================
// Source Re-exports
// =============================================================================

pub use source::{GithubLister, RepoLocator, SourceLister};

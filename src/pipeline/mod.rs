//! Ingestion Pipeline
//!
//! Multi-stage fan-out/fan-in over the task queue:
//!
//! ```text
//! start_run → crawl(root) → crawl(child)* ─drain→ summary batches ─drain→
//!     overview → analysis batches ─drain→ SUCCESS
//! ```
//!
//! Each stage tracks `(total, completed)` in the counter store. Exactly one
//! worker observes the drain of a stage and performs the handoff; every
//! other worker only counts its own unit. A run that reaches a terminal
//! state stops handing off, and its remaining jobs count themselves out.

mod batch;
mod cancel;
mod crawl;
pub mod jobs;
mod orchestrator;
mod overview;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::BatchHandler;
pub use cancel::{CancelReport, mark_cancelled};
pub use crawl::{CrawlHandler, ExcludeSet};
pub use orchestrator::{RunSummary, StageSnapshot, run_summary};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::ai::{QuotaGuard, RetryPolicy, SharedProvider, SharedQuotaGuard, WindowClock};
use crate::config::{Config, PipelineConfig};
use crate::notify::{Notifier, RunUpdate};
use crate::progress::SharedCounterStore;
use crate::queue::{JobOptions, QueueEvent, TaskQueue};
use crate::source::SharedSource;
use crate::storage::SharedDatabase;
use crate::types::{Result, RunStatus, Stage};

/// External collaborators of a pipeline
pub struct Services {
    pub db: SharedDatabase,
    pub counters: SharedCounterStore,
    pub source: SharedSource,
    pub provider: SharedProvider,
    pub notifier: Notifier,
    /// Quota window clock; system clock when `None`
    pub clock: Option<Arc<dyn WindowClock>>,
}

/// Shared state every stage handler works against
pub struct PipelineContext {
    pub db: SharedDatabase,
    pub counters: SharedCounterStore,
    pub queue: TaskQueue,
    pub source: SharedSource,
    pub provider: SharedProvider,
    pub quota: SharedQuotaGuard,
    pub notifier: Notifier,
    pub retry: RetryPolicy,
    pub config: PipelineConfig,
    pub exclude: ExcludeSet,
}

pub type SharedContext = Arc<PipelineContext>;

impl PipelineContext {
    /// Build the context without starting any worker.
    pub fn new(config: &Config, services: Services) -> Result<Self> {
        config.validate()?;

        let mut quota = QuotaGuard::new(services.counters.clone(), &config.quota);
        if let Some(clock) = services.clock {
            quota = quota.with_clock(clock);
        }

        Ok(Self {
            db: services.db,
            counters: services.counters,
            queue: TaskQueue::new(),
            source: services.source,
            provider: services.provider,
            quota: Arc::new(quota),
            notifier: services.notifier,
            retry: RetryPolicy::new(config.pipeline.max_ai_attempts),
            exclude: ExcludeSet::new(&config.pipeline.exclude)?,
            config: config.pipeline.clone(),
        })
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions::new(self.config.attempts, self.config.backoff())
    }

    pub fn batch_size(&self, stage: Stage) -> usize {
        match stage {
            Stage::Analysis => self.config.analysis_batch_size,
            _ => self.config.summary_batch_size,
        }
        .max(1)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Running pipeline: context plus registered stage workers
pub struct Pipeline {
    ctx: SharedContext,
}

impl Pipeline {
    /// Build the context, register one worker per stage queue, and start
    /// the failed-job listener. Must be called inside a Tokio runtime.
    pub fn start(config: &Config, services: Services) -> Result<Self> {
        let ctx: SharedContext = Arc::new(PipelineContext::new(config, services)?);

        ctx.queue.register_worker(
            Stage::Crawl.queue_name(),
            Arc::new(CrawlHandler::new(ctx.clone())),
            ctx.config.crawl_concurrency,
        );
        for stage in [Stage::Summary, Stage::Analysis] {
            ctx.queue.register_worker(
                stage.queue_name(),
                Arc::new(BatchHandler::new(ctx.clone())),
                ctx.config.batch_concurrency,
            );
        }

        spawn_failure_listener(ctx.clone());
        info!(
            crawl_concurrency = ctx.config.crawl_concurrency,
            batch_concurrency = ctx.config.batch_concurrency,
            provider = ctx.provider.name(),
            "Pipeline started"
        );
        Ok(Self { ctx })
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    pub async fn start_run(&self, source_locator: &str) -> Result<String> {
        self.ctx.start_run(source_locator).await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<CancelReport> {
        cancel::cancel_run(&self.ctx, run_id).await
    }

    pub async fn status(&self, run_id: &str) -> Result<RunSummary> {
        self.ctx.status(run_id).await
    }

    pub async fn wait_for_completion(&self, run_id: &str, timeout: Duration) -> Result<RunStatus> {
        self.ctx.wait_for_completion(run_id, timeout).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.ctx.notifier.subscribe()
    }

    pub fn shutdown(&self) {
        self.ctx.queue.shutdown();
    }
}

/// Log permanent job failures; a handler panic is a coordinator fault.
fn spawn_failure_listener(ctx: SharedContext) {
    let mut events = ctx.queue.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    error!(skipped, "Failed-job listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let QueueEvent::Failed {
                queue,
                job_id,
                payload,
                error,
                attempts,
                panicked,
            } = event;
            let run_id = jobs::payload_run_id(&payload).unwrap_or("<unknown>");
            error!(
                run_id,
                queue = %queue,
                job_id = %job_id,
                attempts,
                panicked,
                error = %error,
                "Job failed permanently"
            );

            if panicked {
                ctx.mark_error(run_id, &format!("{} handler panicked: {}", queue, error));
            }
        }
    });
}

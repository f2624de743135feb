//! Worker registration and per-queue dispatch.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, warn};

use super::job::{Job, JobContext, QueueEvent};
use super::{QueueState, Settled, TaskQueue};
use crate::types::Result;

/// Processes the payloads of one queue.
///
/// Returning `Err` hands the job back to the queue, which retries it with
/// backoff until its attempts are exhausted.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<()>;
}

/// Closure adapter for [`JobHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<()> {
        (self.0)(ctx, payload).await
    }
}

/// Wrap a closure as a shared handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Dispatch loop: at most `concurrency` handlers in flight for this queue.
pub(super) async fn dispatch(
    queue: TaskQueue,
    state: Arc<QueueState>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    debug!(queue = %state.name, concurrency, "Dispatcher started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let job = loop {
            if let Some(job) = state.take_next().await {
                break Some(job);
            }
            tokio::select! {
                _ = state.notify.notified() => {}
                _ = shutdown.changed() => break None,
            }
        };
        let Some(job) = job else { break };

        let queue = queue.clone();
        let state = state.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            execute(queue, state, handler, job).await;
        });
    }

    debug!(queue = %state.name, "Dispatcher stopped");
}

async fn execute(queue: TaskQueue, state: Arc<QueueState>, handler: Arc<dyn JobHandler>, job: Job) {
    let ctx = JobContext {
        job_id: job.id.clone(),
        queue: job.queue.clone(),
        attempt: job.attempts_made,
        attempts: job.options.attempts,
    };

    // Own task so a panicking handler is reported instead of tearing down the worker
    let payload = job.payload.clone();
    let outcome = tokio::spawn(async move { handler.handle(ctx, payload).await }).await;

    let (message, panicked) = match outcome {
        Ok(Ok(())) => {
            state.complete(&job.id).await;
            return;
        }
        Ok(Err(e)) => (e.to_string(), false),
        Err(join_error) => (format!("handler panicked: {}", join_error), true),
    };

    match state.fail(&job.id).await {
        Settled::Retry(delay) => {
            warn!(
                queue = %job.queue,
                job_id = %job.id,
                attempt = job.attempts_made,
                attempts = job.options.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Job failed, retrying"
            );
            let state = state.clone();
            let job_id = job.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                state.promote(&job_id).await;
            });
        }
        Settled::Failed(failed) => {
            error!(
                queue = %failed.queue,
                job_id = %failed.id,
                attempts = failed.attempts_made,
                error = %message,
                "Job failed permanently"
            );
            queue.emit(QueueEvent::Failed {
                queue: failed.queue,
                job_id: failed.id,
                payload: failed.payload,
                error: message,
                attempts: failed.attempts_made,
                panicked,
            });
        }
        Settled::Gone => {
            debug!(job_id = %job.id, "Job settled after removal");
        }
    }
}

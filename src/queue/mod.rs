//! Task Queue
//!
//! Named in-process work queues with per-job retry options, bounded
//! per-queue concurrency and removal of pending jobs by predicate.
//!
//! ```text
//!  enqueue ──► Waiting ──dispatch──► Active ──ok──► Completed
//!                 ▲                    │
//!                 │ backoff elapsed    │ err, attempts left
//!              Delayed ◄───────────────┤
//!                                      │ err, final attempt
//!                                      ▼
//!                                   Failed ──► QueueEvent::Failed
//! ```

mod job;
mod worker;

pub use job::{Job, JobContext, JobOptions, JobState, QueueCounts, QueueEvent};
pub use worker::{FnHandler, JobHandler, handler_fn};

use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tracing::{debug, info};

use crate::constants;
use crate::types::{IngestError, Result};

// =============================================================================
// Per-queue State
// =============================================================================

#[derive(Default)]
struct QueueJobs {
    jobs: HashMap<String, Job>,
    ready: VecDeque<String>,
    completed: usize,
    failed: usize,
}

pub(crate) struct QueueState {
    name: String,
    jobs: Mutex<QueueJobs>,
    notify: Notify,
}

/// Result of settling a failed attempt
pub(crate) enum Settled {
    Retry(Duration),
    Failed(Job),
    /// Removed while active
    Gone,
}

impl QueueState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            jobs: Mutex::new(QueueJobs::default()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, job: Job) {
        let mut guard = self.jobs.lock().await;
        guard.ready.push_back(job.id.clone());
        guard.jobs.insert(job.id.clone(), job);
        drop(guard);
        self.notify.notify_one();
    }

    /// Claim the next waiting job, marking it active.
    async fn take_next(&self) -> Option<Job> {
        let mut guard = self.jobs.lock().await;
        while let Some(id) = guard.ready.pop_front() {
            // Removed jobs leave stale ids behind
            if let Some(job) = guard.jobs.get_mut(&id)
                && job.state == JobState::Waiting
            {
                job.state = JobState::Active;
                job.attempts_made += 1;
                return Some(job.clone());
            }
        }
        None
    }

    async fn complete(&self, id: &str) {
        let mut guard = self.jobs.lock().await;
        if guard.jobs.remove(id).is_some() {
            guard.completed += 1;
        }
    }

    async fn fail(&self, id: &str) -> Settled {
        let mut guard = self.jobs.lock().await;
        let Some(job) = guard.jobs.get_mut(id) else {
            return Settled::Gone;
        };

        if job.attempts_made < job.options.attempts {
            job.state = JobState::Delayed;
            return Settled::Retry(job.options.backoff_delay(job.attempts_made - 1));
        }

        let mut failed = match guard.jobs.remove(id) {
            Some(job) => job,
            None => return Settled::Gone,
        };
        failed.state = JobState::Failed;
        guard.failed += 1;
        Settled::Failed(failed)
    }

    /// Move a delayed job back to waiting once its backoff elapsed.
    async fn promote(&self, id: &str) {
        let mut guard = self.jobs.lock().await;
        let promoted = match guard.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Delayed => {
                job.state = JobState::Waiting;
                true
            }
            _ => false,
        };
        if promoted {
            guard.ready.push_back(id.to_string());
            drop(guard);
            self.notify.notify_one();
        }
    }

    async fn counts(&self) -> QueueCounts {
        let guard = self.jobs.lock().await;
        let mut counts = QueueCounts {
            completed: guard.completed,
            failed: guard.failed,
            ..QueueCounts::default()
        };
        for job in guard.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed | JobState::Failed => {}
            }
        }
        counts
    }
}

// =============================================================================
// Task Queue
// =============================================================================

struct QueueInner {
    queues: DashMap<String, Arc<QueueState>>,
    events: broadcast::Sender<QueueEvent>,
    shutdown: watch::Sender<bool>,
}

/// Cloneable handle to a set of named queues.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(constants::queue::EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                queues: DashMap::new(),
                events,
                shutdown,
            }),
        }
    }

    fn state(&self, queue: &str) -> Arc<QueueState> {
        self.inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::new(queue)))
            .clone()
    }

    /// Add a job and return its id. The job runs once a worker picks it up.
    pub async fn enqueue(&self, queue: &str, payload: Value, options: JobOptions) -> Result<String> {
        if *self.inner.shutdown.borrow() {
            return Err(IngestError::Queue(format!(
                "queue {} is shut down",
                queue
            )));
        }

        let job = Job::new(queue, payload, options);
        let id = job.id.clone();
        self.state(queue).push(job).await;
        debug!(queue, job_id = %id, "Enqueued job");
        Ok(id)
    }

    /// Start dispatching `queue` to `handler` with at most `concurrency`
    /// handlers running at once.
    pub fn register_worker(&self, queue: &str, handler: Arc<dyn JobHandler>, concurrency: usize) {
        let state = self.state(queue);
        let shutdown = self.inner.shutdown.subscribe();
        info!(queue, concurrency, "Registered worker");
        tokio::spawn(worker::dispatch(
            self.clone(),
            state,
            handler,
            concurrency,
            shutdown,
        ));
    }

    /// Remove every job of `queue` in one of `states` whose payload matches.
    ///
    /// Only `Waiting` and `Delayed` jobs can be removed; active jobs are
    /// left to finish. Returns the number of removed jobs.
    pub async fn remove_jobs<P>(&self, queue: &str, predicate: P, states: &[JobState]) -> usize
    where
        P: Fn(&Value) -> bool,
    {
        let Some(state) = self.inner.queues.get(queue).map(|s| s.clone()) else {
            return 0;
        };

        let mut guard = state.jobs.lock().await;
        let before = guard.jobs.len();
        guard.jobs.retain(|_, job| {
            let removable = matches!(job.state, JobState::Waiting | JobState::Delayed)
                && states.contains(&job.state);
            !(removable && predicate(&job.payload))
        });
        let removed = before - guard.jobs.len();

        if removed > 0 {
            let QueueJobs { jobs, ready, .. } = &mut *guard;
            ready.retain(|id| jobs.contains_key(id));
            debug!(queue, removed, "Removed jobs");
        }
        removed
    }

    pub async fn counts(&self, queue: &str) -> QueueCounts {
        match self.inner.queues.get(queue).map(|s| s.clone()) {
            Some(state) => state.counts().await,
            None => QueueCounts::default(),
        }
    }

    /// Subscribe to queue events (permanent failures)
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Stop every dispatcher. Active handlers run to completion.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(attempts: u32) -> JobOptions {
        JobOptions::new(attempts, Duration::from_millis(5))
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let queue = TaskQueue::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        queue.register_worker(
            "work",
            handler_fn(move |_ctx, _payload| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            2,
        );

        for i in 0..5 {
            queue.enqueue("work", json!({ "n": i }), fast(1)).await.unwrap();
        }

        wait_for(|| async { queue.counts("work").await.completed == 5 }).await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(queue.counts("work").await.pending(), 0);
    }

    #[tokio::test]
    async fn test_retry_then_permanent_failure_event() {
        let queue = TaskQueue::new();
        let mut events = queue.subscribe();
        let attempts_seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = attempts_seen.clone();
        queue.register_worker(
            "flaky",
            handler_fn(move |ctx, _payload| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((ctx.attempt, ctx.is_final_attempt()));
                    Err(IngestError::Queue("boom".to_string()))
                }
            }),
            1,
        );

        queue
            .enqueue("flaky", json!({ "run_id": "r1" }), fast(3))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let QueueEvent::Failed {
            attempts, panicked, ..
        } = event;
        assert_eq!(attempts, 3);
        assert!(!panicked);
        assert_eq!(
            *attempts_seen.lock().unwrap(),
            vec![(1, false), (2, false), (3, true)]
        );
        assert_eq!(queue.counts("flaky").await.failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported() {
        let queue = TaskQueue::new();
        let mut events = queue.subscribe();
        queue.register_worker(
            "panics",
            handler_fn(|_ctx, payload| async move {
                if payload.is_object() {
                    panic!("handler exploded");
                }
                Ok(())
            }),
            1,
        );
        queue.enqueue("panics", json!({}), fast(1)).await.unwrap();

        let QueueEvent::Failed { panicked, .. } =
            tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
        assert!(panicked);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = TaskQueue::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        queue.register_worker(
            "bounded",
            handler_fn(move |_ctx, _payload| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            2,
        );

        for _ in 0..8 {
            queue.enqueue("bounded", json!({}), fast(1)).await.unwrap();
        }
        wait_for(|| async { queue.counts("bounded").await.completed == 8 }).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_remove_jobs_by_predicate() {
        let queue = TaskQueue::new();
        for run in ["a", "b", "a"] {
            queue
                .enqueue("idle", json!({ "run_id": run }), fast(1))
                .await
                .unwrap();
        }

        let removed = queue
            .remove_jobs(
                "idle",
                |payload| payload["run_id"] == "a",
                &[JobState::Waiting, JobState::Delayed],
            )
            .await;
        assert_eq!(removed, 2);
        assert_eq!(queue.counts("idle").await.waiting, 1);

        let again = queue
            .remove_jobs("idle", |payload| payload["run_id"] == "a", &[JobState::Waiting])
            .await;
        assert_eq!(again, 0);
        assert_eq!(
            queue
                .remove_jobs("missing", |_| true, &[JobState::Waiting])
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_active_jobs_are_not_removed() {
        let queue = TaskQueue::new();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        queue.register_worker(
            "busy",
            handler_fn(move |_ctx, _payload| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(())
                }
            }),
            1,
        );
        queue
            .enqueue("busy", json!({ "run_id": "r" }), fast(1))
            .await
            .unwrap();
        wait_for(|| async { queue.counts("busy").await.active == 1 }).await;

        let removed = queue
            .remove_jobs(
                "busy",
                |_| true,
                &[JobState::Waiting, JobState::Delayed, JobState::Active],
            )
            .await;
        assert_eq!(removed, 0);

        release.notify_one();
        wait_for(|| async { queue.counts("busy").await.completed == 1 }).await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = TaskQueue::new();
        queue.shutdown();
        assert!(queue.enqueue("any", json!({}), fast(1)).await.is_err());
    }
}

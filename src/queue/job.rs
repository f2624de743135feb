//! Job records and per-job options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::constants;

/// Retry options attached to a job at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Total attempts including the first one.
    pub attempts: u32,
    /// Base delay; the n-th retry waits `backoff * 2^n` (n from 0).
    pub backoff: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: constants::queue::DEFAULT_ATTEMPTS,
            backoff: Duration::from_millis(constants::queue::DEFAULT_BACKOFF_MS),
        }
    }
}

impl JobOptions {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt_index` (0-based).
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt_index.min(16)))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be dispatched
    Waiting,
    /// Backing off before a retry
    Delayed,
    /// Dispatched to a handler
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job held by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    pub options: JobOptions,
    pub state: JobState,
    /// Attempts already made (failed or in flight)
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(queue: &str, payload: Value, options: JobOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            payload,
            options,
            state: JobState::Waiting,
            attempts_made: 0,
            created_at: Utc::now(),
        }
    }
}

/// What a handler knows about the attempt it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub queue: String,
    /// Current attempt, starting at 1
    pub attempt: u32,
    pub attempts: u32,
}

impl JobContext {
    /// No retry follows a failure of this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.attempts
    }
}

/// Per-state job counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Jobs not yet settled
    pub fn pending(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}

/// Events broadcast by the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job exhausted its attempts
    Failed {
        queue: String,
        job_id: String,
        payload: Value,
        error: String,
        attempts: u32,
        /// The last attempt panicked instead of returning an error
        panicked: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let options = JobOptions::new(4, Duration::from_millis(100));
        assert_eq!(options.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(options.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(options.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_attempts_at_least_one() {
        assert_eq!(JobOptions::new(0, Duration::ZERO).attempts, 1);
    }

    #[test]
    fn test_final_attempt() {
        let ctx = JobContext {
            job_id: "j".to_string(),
            queue: "crawl".to_string(),
            attempt: 3,
            attempts: 3,
        };
        assert!(ctx.is_final_attempt());
        assert!(
            !JobContext {
                attempt: 1,
                ..ctx
            }
            .is_final_attempt()
        );
    }
}

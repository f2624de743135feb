//! Unified AI retry policy.
//!
//! One loop shared by both batch stages and the overview step. Each attempt
//! first acquires quota, then runs the caller's closure (provider call plus
//! validation). Failures are routed by [`ErrorCategory`]:
//!
//! - `RateLimit`: close the current quota window, sleep the quota backoff, retry
//! - `Format`: retry immediately
//! - anything else: return the error to the task queue

use std::future::Future;
use tracing::{debug, warn};

use super::quota::QuotaGuard;
use crate::constants;
use crate::types::{ErrorCategory, IngestError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(constants::batch::DEFAULT_MAX_AI_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `call` until it succeeds, hits a non-retryable category, or the
    /// attempt ceiling is reached. `call` receives the 1-based attempt.
    ///
    /// When attempts run out the last error is returned unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        quota: &QuotaGuard,
        estimated_tokens: u64,
        label: &str,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            quota.acquire(estimated_tokens).await?;

            let err = match call(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "AI call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let category = err.category();
            let retryable = matches!(category, ErrorCategory::RateLimit | ErrorCategory::Format);
            if !retryable || attempt >= self.max_attempts {
                warn!(
                    label,
                    attempt,
                    max_attempts = self.max_attempts,
                    category = %category,
                    error = %err,
                    "AI call failed"
                );
                return Err(err);
            }

            match category {
                ErrorCategory::RateLimit => {
                    let hint = match &err {
                        IngestError::Llm(e) => e.retry_after,
                        _ => None,
                    };
                    warn!(
                        label,
                        attempt,
                        backoff_ms = quota.backoff().as_millis() as u64,
                        retry_after = ?hint,
                        "Rate limited by provider"
                    );
                    quota.force_exceeded().await?;
                    tokio::time::sleep(quota.backoff()).await;
                }
                _ => {
                    warn!(label, attempt, error = %err, "Malformed AI response, retrying");
                }
            }
            attempt += 1;
        }
    }
}

//! Quota Guard
//!
//! Per-minute request and token budget shared by every AI caller. Buckets
//! live in the counter store under `quota:requests:<minute>` and
//! `quota:tokens:<minute>` and expire after one window, so the budget is
//! shared across workers (and processes, with the SQLite backend).

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::QuotaConfig;
use crate::constants;
use crate::progress::{Reservation, SharedCounterStore};
use crate::types::Result;

// =============================================================================
// Window Clock
// =============================================================================

/// Source of the current one-minute window index
pub trait WindowClock: Send + Sync {
    fn current_minute(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WindowClock for SystemClock {
    fn current_minute(&self) -> i64 {
        chrono::Utc::now().timestamp().div_euclid(60)
    }
}

/// Clock advanced by hand
#[derive(Debug, Default)]
pub struct ManualClock {
    minute: AtomicI64,
}

impl ManualClock {
    pub fn new(minute: i64) -> Self {
        Self {
            minute: AtomicI64::new(minute),
        }
    }

    pub fn advance(&self) {
        self.minute.fetch_add(1, Ordering::SeqCst);
    }
}

impl WindowClock for ManualClock {
    fn current_minute(&self) -> i64 {
        self.minute.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Quota Guard
// =============================================================================

pub struct QuotaGuard {
    store: SharedCounterStore,
    clock: Arc<dyn WindowClock>,
    requests_per_minute: u64,
    tokens_per_minute: u64,
    wait: Duration,
    backoff: Duration,
}

pub type SharedQuotaGuard = Arc<QuotaGuard>;

impl QuotaGuard {
    pub fn new(store: SharedCounterStore, config: &QuotaConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            requests_per_minute: config.requests_per_minute.max(1),
            tokens_per_minute: config.tokens_per_minute.max(1),
            wait: Duration::from_millis(config.wait_ms),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn WindowClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sleep applied after the provider reports a rate limit
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn window_ttl() -> Duration {
        Duration::from_secs(constants::quota::WINDOW_TTL_SECS)
    }

    fn request_key(&self) -> String {
        format!("quota:requests:{}", self.clock.current_minute())
    }

    fn token_key(&self) -> String {
        format!("quota:tokens:{}", self.clock.current_minute())
    }

    /// Reserve one request in the current window.
    ///
    /// A refusal leaves the bucket untouched.
    pub async fn check_and_reserve_request(&self) -> Result<Reservation> {
        self.store
            .check_and_reserve(
                &self.request_key(),
                1,
                self.requests_per_minute,
                Self::window_ttl(),
            )
            .await
    }

    /// Reserve `tokens` in the current window.
    pub async fn check_and_reserve_tokens(&self, tokens: u64) -> Result<Reservation> {
        self.store
            .check_and_reserve(
                &self.token_key(),
                tokens,
                self.tokens_per_minute,
                Self::window_ttl(),
            )
            .await
    }

    /// Wait until one request and `tokens` fit in the current window.
    pub async fn acquire(&self, tokens: u64) -> Result<()> {
        // A single call larger than the whole budget could never be admitted
        let tokens = if tokens > self.tokens_per_minute {
            warn!(
                tokens,
                limit = self.tokens_per_minute,
                "Estimated tokens exceed per-minute budget, reserving the full budget"
            );
            self.tokens_per_minute
        } else {
            tokens
        };

        let mut waits = 0u32;
        loop {
            let request = self.check_and_reserve_request().await?;
            if request.allowed {
                // A refused token reservation still spends this request slot
                let reserved = self.check_and_reserve_tokens(tokens).await?;
                if reserved.allowed {
                    if waits > 0 {
                        debug!(waits, "Quota acquired after waiting");
                    }
                    return Ok(());
                }
                info!(
                    tokens,
                    current = reserved.current,
                    limit = self.tokens_per_minute,
                    "Token budget exhausted, waiting"
                );
            } else {
                info!(
                    current = request.current,
                    limit = self.requests_per_minute,
                    "Request budget exhausted, waiting"
                );
            }

            waits += 1;
            tokio::time::sleep(self.wait + random_jitter(self.wait)).await;
        }
    }

    /// Mark the current window's request budget as spent.
    pub async fn force_exceeded(&self) -> Result<()> {
        warn!(
            limit = self.requests_per_minute,
            "Provider rate limit hit, closing the current request window"
        );
        self.store
            .force(
                &self.request_key(),
                self.requests_per_minute,
                Self::window_ttl(),
            )
            .await
    }
}

fn random_jitter(base: Duration) -> Duration {
    let max_jitter_ms = (base.as_millis() as u64 / 4).min(constants::quota::MAX_JITTER_MS);
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

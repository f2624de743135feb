//! Progress Counters
//!
//! Atomic counter store shared by every stage worker. Two concerns live here:
//!
//! - **Stage counters**: a `(total, completed)` pair per `(run, stage)`.
//!   Workers add to `total` before fanning out and to `completed` after a
//!   unit's side effects are durable; [`CounterStore::try_complete`] is the
//!   single atomic drain check that lets exactly one worker advance the run.
//! - **Rate buckets**: TTL-bounded integer buckets used by the quota guard.
//!
//! Backends: [`InMemoryCounterStore`] for a single coordinator process and
//! [`SqliteCounterStore`] when several processes share one database file.

mod memory;
mod sqlite;

pub use memory::InMemoryCounterStore;
pub use sqlite::SqliteCounterStore;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CounterBackend;
use crate::storage::SharedDatabase;
use crate::types::{Result, Stage};

/// Observed state of one stage counter pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub total: u64,
    pub completed: u64,
}

/// Outcome of a conditional bucket increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub allowed: bool,
    /// Bucket value after the call
    pub current: u64,
}

/// Atomic counter store.
///
/// Every method is a single atomic unit: no caller can observe a partially
/// applied update, and no method splits its read from its write.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` newly discovered units. Returns the new total.
    async fn incr_total(&self, run_id: &str, stage: Stage, delta: u64) -> Result<u64>;

    /// Add every unit of `units` not registered before to `total`.
    ///
    /// Registering the same unit again adds nothing, so a fan-out can be
    /// repeated after a partial failure. Returns the new total.
    async fn register_units(&self, run_id: &str, stage: Stage, units: &[String]) -> Result<u64>;

    /// Record completion of `unit`. A unit already counted is ignored, and
    /// `completed` never exceeds `total`. Returns the new completed count.
    async fn incr_completed(&self, run_id: &str, stage: Stage, unit: &str) -> Result<u64>;

    /// True iff `completed == total && total > 0`. A true result retires
    /// the pair, so it is observed at most once per `(run, stage)`.
    async fn try_complete(&self, run_id: &str, stage: Stage) -> Result<bool>;

    /// Start a stage over with a known total.
    async fn reset(&self, run_id: &str, stage: Stage, total: u64) -> Result<()>;

    async fn snapshot(&self, run_id: &str, stage: Stage) -> Result<Option<StageProgress>>;

    /// Drop every counter pair of a run.
    async fn clear_run(&self, run_id: &str) -> Result<()>;

    /// Add `amount` to bucket `key` if the result stays within `limit`.
    ///
    /// A refused reservation leaves the bucket untouched. An allowed one
    /// refreshes the bucket expiry to `ttl`.
    async fn check_and_reserve(
        &self,
        key: &str,
        amount: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Reservation>;

    /// Overwrite bucket `key` with `value`.
    async fn force(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;
}

pub type SharedCounterStore = Arc<dyn CounterStore>;

/// Build the configured counter backend
pub fn create_counter_store(backend: CounterBackend, db: &SharedDatabase) -> SharedCounterStore {
    match backend {
        CounterBackend::Memory => Arc::new(InMemoryCounterStore::new()),
        CounterBackend::Sqlite => Arc::new(SqliteCounterStore::new(db.clone())),
    }
}

//! In-memory counter store for single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::{CounterStore, Reservation, StageProgress};
use crate::types::{Result, Stage};

#[derive(Debug, Default)]
struct CounterEntry {
    total: u64,
    completed: u64,
    units: HashSet<String>,
    registered: HashSet<String>,
}

#[derive(Debug)]
struct Bucket {
    value: u64,
    expires_at: Instant,
}

/// DashMap-backed store.
///
/// Each `(run, stage)` pair is one map entry, so every check-and-update runs
/// under a single shard lock.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<(String, Stage), CounterEntry>,
    buckets: DashMap<String, Bucket>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buckets of past windows. Must not run while holding a bucket entry.
    fn sweep_expired(&self, now: Instant) {
        self.buckets.retain(|_, bucket| bucket.expires_at > now);
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_total(&self, run_id: &str, stage: Stage, delta: u64) -> Result<u64> {
        let mut entry = self
            .counters
            .entry((run_id.to_string(), stage))
            .or_default();
        entry.total += delta;
        Ok(entry.total)
    }

    async fn register_units(&self, run_id: &str, stage: Stage, units: &[String]) -> Result<u64> {
        let mut entry = self
            .counters
            .entry((run_id.to_string(), stage))
            .or_default();
        for unit in units {
            if entry.registered.insert(unit.clone()) {
                entry.total += 1;
            }
        }
        Ok(entry.total)
    }

    async fn incr_completed(&self, run_id: &str, stage: Stage, unit: &str) -> Result<u64> {
        let mut entry = self
            .counters
            .entry((run_id.to_string(), stage))
            .or_default();

        if entry.units.contains(unit) {
            return Ok(entry.completed);
        }
        if entry.completed >= entry.total {
            tracing::warn!(
                run_id,
                stage = %stage,
                unit,
                total = entry.total,
                "Completion beyond total ignored"
            );
            return Ok(entry.completed);
        }

        entry.units.insert(unit.to_string());
        entry.completed += 1;
        Ok(entry.completed)
    }

    async fn try_complete(&self, run_id: &str, stage: Stage) -> Result<bool> {
        let retired = self
            .counters
            .remove_if(&(run_id.to_string(), stage), |_, entry| {
                entry.total > 0 && entry.completed == entry.total
            });
        Ok(retired.is_some())
    }

    async fn reset(&self, run_id: &str, stage: Stage, total: u64) -> Result<()> {
        self.counters.insert(
            (run_id.to_string(), stage),
            CounterEntry {
                total,
                ..CounterEntry::default()
            },
        );
        Ok(())
    }

    async fn snapshot(&self, run_id: &str, stage: Stage) -> Result<Option<StageProgress>> {
        Ok(self
            .counters
            .get(&(run_id.to_string(), stage))
            .map(|entry| StageProgress {
                total: entry.total,
                completed: entry.completed,
            }))
    }

    async fn clear_run(&self, run_id: &str) -> Result<()> {
        self.counters.retain(|(run, _), _| run != run_id);
        Ok(())
    }

    async fn check_and_reserve(
        &self,
        key: &str,
        amount: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Reservation> {
        let now = Instant::now();
        self.sweep_expired(now);
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            value: 0,
            expires_at: now + ttl,
        });

        if bucket.expires_at <= now {
            bucket.value = 0;
        }

        if bucket.value + amount > limit {
            return Ok(Reservation {
                allowed: false,
                current: bucket.value,
            });
        }

        bucket.value += amount;
        bucket.expires_at = now + ttl;
        Ok(Reservation {
            allowed: true,
            current: bucket.value,
        })
    }

    async fn force(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        self.sweep_expired(now);
        self.buckets.insert(
            key.to_string(),
            Bucket {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

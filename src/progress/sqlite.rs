//! SQLite-backed counter store.
//!
//! Every operation is one `BEGIN IMMEDIATE` transaction, so the read and the
//! conditional write happen under the database write lock even when several
//! coordinator processes share the file.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::time::Duration;

use super::{CounterStore, Reservation, StageProgress};
use crate::storage::SharedDatabase;
use crate::types::{Result, Stage};

pub struct SqliteCounterStore {
    db: SharedDatabase,
}

impl SqliteCounterStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drop the per-unit bookkeeping of one pair
fn forget_units(conn: &Connection, run_id: &str, stage: Stage) -> Result<()> {
    conn.execute(
        "DELETE FROM stage_counter_units WHERE run_id = ?1 AND stage = ?2",
        params![run_id, stage.as_str()],
    )?;
    conn.execute(
        "DELETE FROM stage_counter_registered WHERE run_id = ?1 AND stage = ?2",
        params![run_id, stage.as_str()],
    )?;
    Ok(())
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn incr_total(&self, run_id: &str, stage: Stage, delta: u64) -> Result<u64> {
        self.db.immediate_transaction(|conn| {
            let total: i64 = conn.query_row(
                "INSERT INTO stage_counters (run_id, stage, total, completed)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT (run_id, stage) DO UPDATE SET total = total + excluded.total
                 RETURNING total",
                params![run_id, stage.as_str(), delta as i64],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
    }

    async fn register_units(&self, run_id: &str, stage: Stage, units: &[String]) -> Result<u64> {
        self.db.immediate_transaction(|conn| {
            let mut register = conn.prepare_cached(
                "INSERT OR IGNORE INTO stage_counter_registered (run_id, stage, unit)
                 VALUES (?1, ?2, ?3)",
            )?;
            let mut added = 0i64;
            for unit in units {
                added += register.execute(params![run_id, stage.as_str(), unit])? as i64;
            }

            let total: i64 = conn.query_row(
                "INSERT INTO stage_counters (run_id, stage, total, completed)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT (run_id, stage) DO UPDATE SET total = total + excluded.total
                 RETURNING total",
                params![run_id, stage.as_str(), added],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
    }

    async fn incr_completed(&self, run_id: &str, stage: Stage, unit: &str) -> Result<u64> {
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO stage_counters (run_id, stage, total, completed)
                 VALUES (?1, ?2, 0, 0)",
                params![run_id, stage.as_str()],
            )?;
            let (total, completed): (i64, i64) = conn.query_row(
                "SELECT total, completed FROM stage_counters WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let seen: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM stage_counter_units
                     WHERE run_id = ?1 AND stage = ?2 AND unit = ?3",
                    params![run_id, stage.as_str(), unit],
                    |row| row.get(0),
                )
                .optional()?;
            if seen.is_some() {
                return Ok(completed as u64);
            }
            if completed >= total {
                tracing::warn!(
                    run_id,
                    stage = %stage,
                    unit,
                    total,
                    "Completion beyond total ignored"
                );
                return Ok(completed as u64);
            }

            conn.execute(
                "INSERT INTO stage_counter_units (run_id, stage, unit) VALUES (?1, ?2, ?3)",
                params![run_id, stage.as_str(), unit],
            )?;
            conn.execute(
                "UPDATE stage_counters SET completed = completed + 1
                 WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage.as_str()],
            )?;
            Ok(completed as u64 + 1)
        })
    }

    async fn try_complete(&self, run_id: &str, stage: Stage) -> Result<bool> {
        self.db.immediate_transaction(|conn| {
            let retired = conn.execute(
                "DELETE FROM stage_counters
                 WHERE run_id = ?1 AND stage = ?2 AND total > 0 AND completed = total",
                params![run_id, stage.as_str()],
            )?;
            if retired == 1 {
                forget_units(conn, run_id, stage)?;
            }
            Ok(retired == 1)
        })
    }

    async fn reset(&self, run_id: &str, stage: Stage, total: u64) -> Result<()> {
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "INSERT INTO stage_counters (run_id, stage, total, completed)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT (run_id, stage) DO UPDATE SET total = excluded.total, completed = 0",
                params![run_id, stage.as_str(), total as i64],
            )?;
            forget_units(conn, run_id, stage)
        })
    }

    async fn snapshot(&self, run_id: &str, stage: Stage) -> Result<Option<StageProgress>> {
        let conn = self.db.connection()?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT total, completed FROM stage_counters WHERE run_id = ?1 AND stage = ?2",
                params![run_id, stage.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(total, completed)| StageProgress {
            total: total as u64,
            completed: completed as u64,
        }))
    }

    async fn clear_run(&self, run_id: &str) -> Result<()> {
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "DELETE FROM stage_counters WHERE run_id = ?1",
                params![run_id],
            )?;
            conn.execute(
                "DELETE FROM stage_counter_units WHERE run_id = ?1",
                params![run_id],
            )?;
            conn.execute(
                "DELETE FROM stage_counter_registered WHERE run_id = ?1",
                params![run_id],
            )?;
            Ok(())
        })
    }

    async fn check_and_reserve(
        &self,
        key: &str,
        amount: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Reservation> {
        let now = now_ms();
        let expires_at = now + ttl.as_millis() as i64;
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "DELETE FROM rate_buckets WHERE expires_at <= ?1",
                params![now],
            )?;
            let current: i64 = conn
                .query_row(
                    "SELECT value FROM rate_buckets WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);
            let current = current as u64;

            if current + amount > limit {
                return Ok(Reservation {
                    allowed: false,
                    current,
                });
            }

            conn.execute(
                "INSERT INTO rate_buckets (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, (current + amount) as i64, expires_at],
            )?;
            Ok(Reservation {
                allowed: true,
                current: current + amount,
            })
        })
    }

    async fn force(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let now = now_ms();
        let expires_at = now + ttl.as_millis() as i64;
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "DELETE FROM rate_buckets WHERE expires_at <= ?1",
                params![now],
            )?;
            conn.execute(
                "INSERT INTO rate_buckets (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value as i64, expires_at],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use crate::storage::Database;
    use std::sync::Arc;

    fn store() -> SqliteCounterStore {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        SqliteCounterStore::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_contract() {
        contract::drain_is_observed_once(&store()).await;
        contract::duplicate_units_count_once(&store()).await;
        contract::completed_never_exceeds_total(&store()).await;
        contract::reset_and_clear(&store()).await;
        contract::buckets_refuse_without_mutation(&store()).await;
        contract::buckets_expire(&store()).await;
        contract::registered_units_raise_total_once(&store()).await;
    }

    #[tokio::test]
    async fn test_expired_windows_are_swept() {
        let store = store();
        let short = Duration::from_millis(20);
        store.check_and_reserve("quota:requests:1", 1, 10, short).await.unwrap();
        store.force("quota:tokens:1", 10, short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        store
            .check_and_reserve("quota:requests:2", 1, 10, Duration::from_secs(60))
            .await
            .unwrap();

        let conn = store.db.connection().unwrap();
        let keys: Vec<String> = conn
            .prepare("SELECT key FROM rate_buckets")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec!["quota:requests:2".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_winner_across_pool_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(dir.path().join("counters.db")).unwrap();
        db.initialize().unwrap();
        let store = Arc::new(SqliteCounterStore::new(Arc::new(db)));

        let units = 24;
        store.incr_total("r", Stage::Summary, units).await.unwrap();

        let handles: Vec<_> = (0..units)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .incr_completed("r", Stage::Summary, &format!("batch-{}", i))
                        .await
                        .unwrap();
                    store.try_complete("r", Stage::Summary).await.unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence for pipeline runs and the repository tree:
//! - Connection pooling via r2d2 for concurrent stage workers
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode so readers never block the crawl writers

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::constants;
use crate::types::{
    DirectoryNode, FileNode, IngestError, NewFile, PipelineRun, Result, ResultExt, RunStatus,
    Stage,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 3;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "Add rate bucket expiry index",
        up: "CREATE INDEX IF NOT EXISTS idx_rate_buckets_expiry ON rate_buckets(expires_at)",
    },
    Migration {
        version: 3,
        description: "Track which child directories have been enqueued",
        up: "ALTER TABLE directories ADD COLUMN enqueued INTEGER NOT NULL DEFAULT 0;
             CREATE INDEX IF NOT EXISTS idx_directories_parent ON directories(run_id, parent_id);",
    },
];

/// Per-run row counts for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunCounts {
    pub files: usize,
    pub directories: usize,
    pub summarized: usize,
    pub analyzed: usize,
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: constants::storage::POOL_SIZE,
            min_idle: 2,
            connection_timeout_secs: 30,
        }
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| {
                IngestError::Storage(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// A single pooled connection, so every caller sees the same database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            IngestError::Storage(format!("Failed to create in-memory pool: {}", e))
        })?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = {};
            PRAGMA wal_autocheckpoint = 1000;
            "#,
            constants::storage::BUSY_TIMEOUT_MS
        ))?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            IngestError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let existing: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if existing == 0 {
            conn.pragma_update(None, "user_version", 1)
                .with_context("Failed to set schema version")?;
        }

        drop(conn);
        self.migrate()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a transaction (panic-safe).
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.transaction_with(TransactionBehavior::Deferred, f)
    }

    /// Transaction that takes the write lock up front (`BEGIN IMMEDIATE`),
    /// so a read-then-write sequence inside `f` is never interleaved with
    /// another writer.
    pub fn immediate_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.transaction_with(TransactionBehavior::Immediate, f)
    }

    fn transaction_with<F, T>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(IngestError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Pipeline Runs
    // =========================================================================

    pub fn create_run(&self, run_id: &str, source_locator: &str) -> Result<PipelineRun> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (id, source_locator, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![run_id, source_locator, RunStatus::Pending.as_str(), now],
        )?;

        Ok(PipelineRun {
            run_id: run_id.to_string(),
            source_locator: source_locator.to_string(),
            status: RunStatus::Pending,
            overview: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, source_locator, status, overview, error_message, created_at, updated_at
                 FROM pipeline_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(run_id, source_locator, status, overview, error_message, created_at, updated_at)| {
                let status = status.parse::<RunStatus>().map_err(IngestError::Storage)?;
                Ok(PipelineRun {
                    run_id,
                    source_locator,
                    status,
                    overview,
                    error_message,
                    created_at,
                    updated_at,
                })
            },
        )
        .transpose()
    }

    pub fn run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM pipeline_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| s.parse::<RunStatus>().map_err(IngestError::Storage))
            .transpose()
    }

    /// Move a run to `status` unless it already reached a terminal state.
    ///
    /// Returns whether the row changed.
    pub fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE pipeline_runs
             SET status = ?2, error_message = COALESCE(?3, error_message), updated_at = ?4
             WHERE id = ?1 AND status IN ('PENDING', 'PROCESSING')",
            params![run_id, status.as_str(), error_message, now],
        )?;
        Ok(changed == 1)
    }

    pub fn set_run_overview(&self, run_id: &str, overview: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET overview = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, overview, now],
        )?;
        Ok(())
    }

    // =========================================================================
    // Repository Tree
    // =========================================================================

    /// Insert files in one transaction, ignoring paths already present.
    ///
    /// Returns the number of rows actually inserted.
    pub fn insert_files(&self, run_id: &str, files: &[NewFile]) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.transaction(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO files
                 (id, run_id, path, name, content, content_hash, directory_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            )?;

            let mut inserted = 0;
            for file in files {
                inserted += stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    run_id,
                    file.path,
                    file.name,
                    file.content,
                    file.content_hash(),
                    file.directory_id,
                    now,
                ])?;
            }
            Ok(inserted)
        })
    }

    /// Insert child directories of `parent_id`, ignoring paths already present.
    ///
    /// Returns only the directories this call created.
    pub fn insert_directories(
        &self,
        run_id: &str,
        parent_id: Option<&str>,
        paths: &[String],
    ) -> Result<Vec<DirectoryNode>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.transaction(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO directories (id, run_id, path, parent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            let mut created = Vec::new();
            for path in paths {
                let id = uuid::Uuid::new_v4().to_string();
                if stmt.execute(params![id, run_id, path, parent_id, now])? == 1 {
                    created.push(DirectoryNode {
                        id,
                        path: path.clone(),
                        parent_id: parent_id.map(str::to_string),
                        run_id: run_id.to_string(),
                    });
                }
            }
            Ok(created)
        })
    }

    /// Children of `parent_id` whose crawl job has not been enqueued yet, ordered by path
    pub fn pending_child_directories(
        &self,
        run_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<DirectoryNode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, path FROM directories
             WHERE run_id = ?1 AND parent_id IS ?2 AND enqueued = 0
             ORDER BY path",
        )?;
        let dirs = stmt
            .query_map(params![run_id, parent_id], |row| {
                Ok(DirectoryNode {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    parent_id: parent_id.map(str::to_string),
                    run_id: run_id.to_string(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(dirs)
    }

    pub fn mark_directories_enqueued(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.transaction(|conn| {
            let mut stmt =
                conn.prepare_cached("UPDATE directories SET enqueued = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
            Ok(())
        })
    }

    /// Paths of files whose `stage` result is still missing, ordered by path
    pub fn eligible_file_paths(&self, run_id: &str, stage: Stage) -> Result<Vec<String>> {
        let column = result_column(stage)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT path FROM files WHERE run_id = ?1 AND {} IS NULL ORDER BY path",
            column
        ))?;
        let paths = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Load files by path; unknown paths are skipped
    pub fn load_files(&self, run_id: &str, paths: &[String]) -> Result<Vec<FileNode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, path, name, content, content_hash, directory_id, run_id,
                    short_summary, analysis
             FROM files WHERE run_id = ?1 AND path = ?2",
        )?;

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = stmt
                .query_row(params![run_id, path], |row| {
                    Ok(FileNode {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        name: row.get(2)?,
                        content: row.get(3)?,
                        content_hash: row.get(4)?,
                        directory_id: row.get(5)?,
                        run_id: row.get(6)?,
                        short_summary: row.get(7)?,
                        analysis: row.get(8)?,
                    })
                })
                .optional()?;
            if let Some(file) = file {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Persist one batch of `(path, text)` results for `stage` atomically
    pub fn store_results(
        &self,
        run_id: &str,
        stage: Stage,
        results: &[(String, String)],
    ) -> Result<usize> {
        let column = result_column(stage)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.transaction(|conn| {
            let mut stmt = conn.prepare(&format!(
                "UPDATE files SET {} = ?3, updated_at = ?4 WHERE run_id = ?1 AND path = ?2",
                column
            ))?;
            let mut updated = 0;
            for (path, text) in results {
                updated += stmt.execute(params![run_id, path, text, now])?;
            }
            Ok(updated)
        })
    }

    /// `(path, short_summary)` for every summarized file of a run
    pub fn file_summaries(&self, run_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT path, short_summary FROM files
             WHERE run_id = ?1 AND short_summary IS NOT NULL ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
        Ok(rows)
    }

    pub fn run_counts(&self, run_id: &str) -> Result<RunCounts> {
        let conn = self.conn()?;
        let (files, summarized, analyzed): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(short_summary IS NOT NULL), 0),
                    COALESCE(SUM(analysis IS NOT NULL), 0)
             FROM files WHERE run_id = ?1",
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let directories: i64 = conn.query_row(
            "SELECT COUNT(*) FROM directories WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;

        Ok(RunCounts {
            files: files as usize,
            directories: directories as usize,
            summarized: summarized as usize,
            analyzed: analyzed as usize,
        })
    }
}

fn result_column(stage: Stage) -> Result<&'static str> {
    match stage {
        Stage::Summary => Ok("short_summary"),
        Stage::Analysis => Ok("analysis"),
        Stage::Crawl => Err(IngestError::Storage(
            "crawl stage has no per-file result column".to_string(),
        )),
    }
}

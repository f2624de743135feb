pub mod database;

pub use database::{Database, PoolConfig, RunCounts, SharedDatabase};

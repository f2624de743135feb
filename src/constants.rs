//! Global Constants
//!
//! Centralized constants for configuration defaults and tuning.
//! All magic numbers should be defined here with documentation.

/// Task queue constants
pub mod queue {
    /// Default attempts per job (first try included)
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    /// Default base delay for exponential job backoff (milliseconds)
    pub const DEFAULT_BACKOFF_MS: u64 = 1_000;

    /// Capacity of the failed-job event stream
    pub const EVENT_CAPACITY: usize = 256;
}

/// Crawl stage constants
pub mod crawl {
    /// Default concurrent directory listings
    pub const DEFAULT_CONCURRENCY: usize = 4;

    /// Files persisted per transaction
    pub const DEFAULT_FILE_BATCH_SIZE: usize = 50;

    /// Files larger than this are skipped (1MB)
    pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

    /// Bytes inspected when sniffing binary content
    pub const BINARY_SNIFF_BYTES: usize = 8_000;
}

/// Batch summary / analysis constants
pub mod batch {
    pub const DEFAULT_CONCURRENCY: usize = 2;

    /// Files per summary batch
    pub const DEFAULT_SUMMARY_BATCH_SIZE: usize = 10;

    /// Files per analysis batch
    pub const DEFAULT_ANALYSIS_BATCH_SIZE: usize = 5;

    /// Attempt ceiling of the in-handler AI retry loop
    pub const DEFAULT_MAX_AI_ATTEMPTS: u32 = 3;

    /// Per-file content budget inside a batch prompt
    pub const MAX_FILE_PROMPT_TOKENS: usize = 4_000;

    /// Budget for the summaries block of the overview prompt
    pub const MAX_OVERVIEW_INPUT_TOKENS: usize = 24_000;
}

/// Quota guard constants
pub mod quota {
    pub const DEFAULT_REQUESTS_PER_MINUTE: u64 = 60;

    pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 200_000;

    /// Base wait when a reservation is refused (milliseconds)
    pub const DEFAULT_WAIT_MS: u64 = 2_000;

    /// Sleep after a provider rate-limit response (milliseconds)
    pub const DEFAULT_BACKOFF_MS: u64 = 5_000;

    /// Upper bound of the random jitter added to each wait (milliseconds)
    pub const MAX_JITTER_MS: u64 = 500;

    /// Lifetime of a one-minute bucket (seconds)
    pub const WINDOW_TTL_SECS: u64 = 60;
}

/// Notification constants
pub mod notify {
    /// Pending updates buffered before publish drops
    pub const CHANNEL_CAPACITY: usize = 1_024;

    /// Subscriber lag tolerated by the broadcast fan-out
    pub const BROADCAST_CAPACITY: usize = 256;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Maximum retries for source listing requests
    pub const MAX_NETWORK_RETRIES: usize = 3;

    /// User agent sent to the hosting API
    pub const USER_AGENT: &str = concat!("repoweave/", env!("CARGO_PKG_VERSION"));
}

/// Storage constants
pub mod storage {
    /// Pool size for file-backed databases
    pub const POOL_SIZE: u32 = 8;

    /// SQLite busy timeout (milliseconds)
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
}

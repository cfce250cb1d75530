//! Shared configuration constants for the orchestrator
//!
//! Default values used by `EngineConfig` and its builder so the same numbers
//! are not repeated across modules.

/// Default maximum number of pooled browser sessions
///
/// Each session is a full headless browser process (~150-300MB resident),
/// so the default stays well below what a single host comfortably runs.
pub const DEFAULT_MAX_SESSIONS: usize = 5;

/// Sessions kept warm even when idle
pub const DEFAULT_MIN_WARM_SESSIONS: usize = 1;

/// Pages served by one session before it is retired
///
/// Long-lived automation contexts leak memory; recycling after a fixed number
/// of pages bounds that growth.
pub const DEFAULT_MAX_PAGES_PER_SESSION: u32 = 50;

/// Memory estimate (bytes) above which a session is retired: 512 MiB
pub const DEFAULT_MAX_SESSION_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Idle sessions beyond the warm minimum are closed after this long
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 300;

/// Bounded wait for `BrowserSessionPool::acquire`
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// Budget for session housekeeping calls (health check, memory estimate,
/// reset, close)
pub const DEFAULT_SESSION_CALL_TIMEOUT_MS: u64 = 5_000;

/// Interval of the pool maintenance loop
pub const DEFAULT_POOL_MAINTENANCE_INTERVAL_SECS: u64 = 5;

/// Result cache time-to-live: 15 minutes
pub const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;

/// Total attempts (first try included) for transient failures
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay of the exponential retry backoff
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Upper bound of a single retry delay (before jitter)
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Maximum jitter added on top of the backoff delay
pub const DEFAULT_RETRY_JITTER_MS: u64 = 250;

/// Tasks waiting for a worker before `Submit` starts failing fast
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Terminal task records are kept this long for status queries: 30 minutes
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 30 * 60;

/// Buffered task events per subscriber before lagging subscribers miss events
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-step timeouts
pub const DEFAULT_NAVIGATE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXTRACT_STRUCTURE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_IDENTIFY_INTERACTIVE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_SEMANTIC_LABELING_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CAPTURE_ARTIFACT_TIMEOUT_MS: u64 = 20_000;

/// Chrome user agent string used by pooled browsers
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

//! Configuration types for the orchestration engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::constants::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_CACHE_TTL_SECS, DEFAULT_CAPTURE_ARTIFACT_TIMEOUT_MS,
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_EXTRACT_STRUCTURE_TIMEOUT_MS,
    DEFAULT_IDENTIFY_INTERACTIVE_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PAGES_PER_SESSION,
    DEFAULT_MAX_SESSION_MEMORY_BYTES, DEFAULT_MAX_SESSIONS, DEFAULT_MIN_WARM_SESSIONS,
    DEFAULT_NAVIGATE_TIMEOUT_MS, DEFAULT_POOL_MAINTENANCE_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_JITTER_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    DEFAULT_SEMANTIC_LABELING_TIMEOUT_MS, DEFAULT_SESSION_CALL_TIMEOUT_MS,
    DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
    DEFAULT_TASK_RETENTION_SECS,
};

/// Top-level engine configuration
///
/// Constructed once at startup, either through [`EngineConfig::builder`] or
/// [`EngineConfig::from_json_file`], and handed to `TaskScheduler::new`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub step_timeouts: StepTimeouts,
    pub browser: BrowserLaunchConfig,
}

/// Browser session pool limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard upper bound on live sessions (idle + leased + launching)
    pub max_sessions: usize,
    /// Sessions kept warm; never created eagerly beyond this
    pub min_warm_sessions: usize,
    /// A session that has served this many pages is retired on release
    pub max_pages_per_session: u32,
    /// A session whose memory estimate reaches this is retired on release
    pub max_session_memory_bytes: u64,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_ms: u64,
    /// Bound on each health check, memory estimate, reset and close
    pub session_call_timeout_ms: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            min_warm_sessions: DEFAULT_MIN_WARM_SESSIONS,
            max_pages_per_session: DEFAULT_MAX_PAGES_PER_SESSION,
            max_session_memory_bytes: DEFAULT_MAX_SESSION_MEMORY_BYTES,
            idle_timeout_secs: DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            session_call_timeout_ms: DEFAULT_SESSION_CALL_TIMEOUT_MS,
            maintenance_interval_secs: DEFAULT_POOL_MAINTENANCE_INTERVAL_SECS,
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Optional capacity bound; the least recently read entry is evicted first
    pub max_entries: Option<usize>,
    /// Period of the background expired-entry sweep (disabled when `None`)
    pub cleanup_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: None,
            cleanup_interval_secs: Some(60),
        }
    }
}

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts allowed per task, first attempt included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            jitter_ms: DEFAULT_RETRY_JITTER_MS,
        }
    }
}

/// Admission and dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requested worker count; capped at the pool's `max_sessions`
    pub concurrency: usize,
    /// Tasks that may wait in the queue before `submit` reports saturation
    pub queue_capacity: usize,
    /// Non-terminal tasks a single principal may own at once
    pub max_inflight_per_principal: Option<usize>,
    /// Terminal task records are purged after this long
    pub task_retention_secs: u64,
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MAX_SESSIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_inflight_per_principal: None,
            task_retention_secs: DEFAULT_TASK_RETENTION_SECS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Per-step execution budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTimeouts {
    pub navigate_ms: u64,
    pub extract_structure_ms: u64,
    pub identify_interactive_ms: u64,
    pub semantic_labeling_ms: u64,
    pub capture_artifact_ms: u64,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            navigate_ms: DEFAULT_NAVIGATE_TIMEOUT_MS,
            extract_structure_ms: DEFAULT_EXTRACT_STRUCTURE_TIMEOUT_MS,
            identify_interactive_ms: DEFAULT_IDENTIFY_INTERACTIVE_TIMEOUT_MS,
            semantic_labeling_ms: DEFAULT_SEMANTIC_LABELING_TIMEOUT_MS,
            capture_artifact_ms: DEFAULT_CAPTURE_ARTIFACT_TIMEOUT_MS,
        }
    }
}

/// Settings for the Chromium-backed session driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserLaunchConfig {
    pub headless: bool,
    /// Explicit Chrome/Chromium binary; auto-detected when `None`
    pub chrome_executable: Option<PathBuf>,
    /// Parent directory for per-session profile directories
    pub user_data_root: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_secs: u64,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            user_data_root: None,
            window_width: 1920,
            window_height: 1080,
            request_timeout_secs: 30,
        }
    }
}

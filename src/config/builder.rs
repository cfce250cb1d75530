//! Fluent builder and validation for `EngineConfig`

use std::path::PathBuf;

use super::types::{
    BrowserLaunchConfig, CacheConfig, EngineConfig, PoolConfig, RetryConfig, SchedulerConfig,
    StepTimeouts,
};
use crate::errors::{EngineError, EngineResult};

/// Builder for [`EngineConfig`]
///
/// Every field starts at its default; `build()` validates the result.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Check value ranges and cross-field constraints
    ///
    /// # Errors
    /// Returns `EngineError::Config` naming the first offending field.
    pub fn validate(&self) -> EngineResult<()> {
        let pool = &self.pool;
        if pool.max_sessions == 0 {
            return Err(config_error("pool.max_sessions must be at least 1"));
        }
        if pool.min_warm_sessions > pool.max_sessions {
            return Err(config_error(format!(
                "pool.min_warm_sessions ({}) exceeds pool.max_sessions ({})",
                pool.min_warm_sessions, pool.max_sessions
            )));
        }
        if pool.max_pages_per_session == 0 {
            return Err(config_error("pool.max_pages_per_session must be at least 1"));
        }
        if pool.max_session_memory_bytes == 0 {
            return Err(config_error("pool.max_session_memory_bytes must be positive"));
        }
        if pool.acquire_timeout_ms == 0 {
            return Err(config_error("pool.acquire_timeout_ms must be positive"));
        }
        if pool.session_call_timeout_ms == 0 {
            return Err(config_error("pool.session_call_timeout_ms must be positive"));
        }
        if pool.idle_timeout_secs == 0 || pool.maintenance_interval_secs == 0 {
            return Err(config_error(
                "pool.idle_timeout_secs and pool.maintenance_interval_secs must be positive",
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(config_error("cache.ttl_secs must be positive"));
        }
        if self.cache.max_entries == Some(0) {
            return Err(config_error("cache.max_entries must be at least 1 when set"));
        }
        if self.cache.cleanup_interval_secs == Some(0) {
            return Err(config_error("cache.cleanup_interval_secs must be positive when set"));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(config_error(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            )));
        }

        let scheduler = &self.scheduler;
        if scheduler.concurrency == 0 {
            return Err(config_error("scheduler.concurrency must be at least 1"));
        }
        if scheduler.queue_capacity == 0 {
            return Err(config_error("scheduler.queue_capacity must be at least 1"));
        }
        if scheduler.max_inflight_per_principal == Some(0) {
            return Err(config_error(
                "scheduler.max_inflight_per_principal must be at least 1 when set",
            ));
        }
        if scheduler.event_channel_capacity == 0 {
            return Err(config_error("scheduler.event_channel_capacity must be at least 1"));
        }

        let steps = &self.step_timeouts;
        if [
            steps.navigate_ms,
            steps.extract_structure_ms,
            steps.identify_interactive_ms,
            steps.semantic_labeling_ms,
            steps.capture_artifact_ms,
        ]
        .contains(&0)
        {
            return Err(config_error("every step timeout must be positive"));
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> EngineError {
    EngineError::Config(message.into())
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn step_timeouts(mut self, step_timeouts: StepTimeouts) -> Self {
        self.config.step_timeouts = step_timeouts;
        self
    }

    #[must_use]
    pub fn browser(mut self, browser: BrowserLaunchConfig) -> Self {
        self.config.browser = browser;
        self
    }

    #[must_use]
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.pool.max_sessions = max;
        self
    }

    #[must_use]
    pub fn min_warm_sessions(mut self, min: usize) -> Self {
        self.config.pool.min_warm_sessions = min;
        self
    }

    #[must_use]
    pub fn max_pages_per_session(mut self, pages: u32) -> Self {
        self.config.pool.max_pages_per_session = pages;
        self
    }

    #[must_use]
    pub fn acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pool.acquire_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn session_call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pool.session_call_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache.ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn cache_max_entries(mut self, max: Option<usize>) -> Self {
        self.config.cache.max_entries = max;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Backoff base, cap and jitter in milliseconds
    #[must_use]
    pub fn retry_backoff_ms(mut self, base: u64, max: u64, jitter: u64) -> Self {
        self.config.retry.base_delay_ms = base;
        self.config.retry.max_delay_ms = max;
        self.config.retry.jitter_ms = jitter;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.scheduler.concurrency = workers;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.scheduler.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_inflight_per_principal(mut self, limit: Option<usize>) -> Self {
        self.config.scheduler.max_inflight_per_principal = limit;
        self
    }

    #[must_use]
    pub fn task_retention_secs(mut self, secs: u64) -> Self {
        self.config.scheduler.task_retention_secs = secs;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.browser.headless = headless;
        self
    }

    #[must_use]
    pub fn chrome_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.browser.chrome_executable = Some(path.into());
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    /// Returns `EngineError::Config` when a value is out of range.
    pub fn build(self) -> EngineResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

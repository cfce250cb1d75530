//! Configuration module for the orchestration engine
//!
//! `EngineConfig` groups pool, cache, retry, scheduler, step-timeout and
//! browser-launch settings. It can be built fluently with validation or
//! loaded from a JSON file in which any missing field takes its default.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::EngineConfigBuilder;
pub use types::{
    BrowserLaunchConfig, CacheConfig, EngineConfig, PoolConfig, RetryConfig, SchedulerConfig,
    StepTimeouts,
};

use std::path::Path;

use crate::errors::{EngineError, EngineResult};

impl EngineConfig {
    /// Load and validate a JSON configuration file
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the file cannot be read, is not valid
    /// JSON for this schema, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }
}

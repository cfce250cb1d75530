//! Duration getters and lookups over the raw configuration fields

use std::time::Duration;

use super::types::{CacheConfig, PoolConfig, RetryConfig, SchedulerConfig, StepTimeouts};
use crate::task_engine::task_types::ParseStep;

impl PoolConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub const fn session_call_timeout(&self) -> Duration {
        Duration::from_millis(self.session_call_timeout_ms)
    }

    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval_secs.map(Duration::from_secs)
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}

impl StepTimeouts {
    /// Budget for a single parse step
    #[must_use]
    pub const fn for_step(&self, step: ParseStep) -> Duration {
        let ms = match step {
            ParseStep::Navigate => self.navigate_ms,
            ParseStep::ExtractStructure => self.extract_structure_ms,
            ParseStep::IdentifyInteractive => self.identify_interactive_ms,
            ParseStep::SemanticLabeling => self.semantic_labeling_ms,
            ParseStep::CaptureArtifact => self.capture_artifact_ms,
        };
        Duration::from_millis(ms)
    }

    /// Uniform budget for every step, mostly useful in tests
    #[must_use]
    pub const fn uniform(ms: u64) -> Self {
        Self {
            navigate_ms: ms,
            extract_structure_ms: ms,
            identify_interactive_ms: ms,
            semantic_labeling_ms: ms,
            capture_artifact_ms: ms,
        }
    }
}

//! Pooled session metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use super::driver::AutomationContext;
use crate::task_engine::task_types::TaskId;

/// Unique identifier of a pooled browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionHealth {
    Healthy,
    /// Usable state is uncertain; never re-leased
    Degraded,
    Crashed,
}

/// Snapshot of a session's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSession {
    pub id: SessionId,
    /// Task holding the lease, `None` while idle
    pub lease_holder: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Pages served over the session's lifetime
    pub page_count: u32,
    pub memory_estimate_bytes: u64,
    pub health: SessionHealth,
}

impl BrowserSession {
    pub(crate) fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            lease_holder: None,
            created_at: now,
            last_used_at: now,
            page_count: 0,
            memory_estimate_bytes: 0,
            health: SessionHealth::Healthy,
        }
    }
}

/// What the lease holder reports when giving a session back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub health: SessionHealth,
    /// Pages loaded during this lease
    pub pages_served: u32,
    /// Fresh memory estimate, if the holder measured one
    pub memory_estimate_bytes: Option<u64>,
}

impl ReleaseOutcome {
    #[must_use]
    pub const fn healthy(pages_served: u32) -> Self {
        Self {
            health: SessionHealth::Healthy,
            pages_served,
            memory_estimate_bytes: None,
        }
    }

    #[must_use]
    pub const fn unhealthy(pages_served: u32) -> Self {
        Self {
            health: SessionHealth::Degraded,
            pages_served,
            memory_estimate_bytes: None,
        }
    }

    #[must_use]
    pub const fn with_memory(mut self, bytes: Option<u64>) -> Self {
        self.memory_estimate_bytes = bytes;
        self
    }
}

/// Why a session left the pool for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirementReason {
    Unhealthy,
    PageLimit,
    MemoryLimit,
    ResetFailed,
    IdleTimeout,
    FailedHealthCheck,
    /// The lease was dropped without an explicit release
    Abandoned,
    Shutdown,
}

impl fmt::Display for RetirementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unhealthy => "reported unhealthy",
            Self::PageLimit => "page limit reached",
            Self::MemoryLimit => "memory limit reached",
            Self::ResetFailed => "state reset failed",
            Self::IdleTimeout => "idle timeout",
            Self::FailedHealthCheck => "failed health check",
            Self::Abandoned => "lease abandoned",
            Self::Shutdown => "pool shutdown",
        })
    }
}

/// A live automation context together with its bookkeeping
pub(crate) struct PooledSession {
    pub(crate) info: BrowserSession,
    pub(crate) context: Box<dyn AutomationContext>,
    pub(crate) last_used: Instant,
}

impl PooledSession {
    pub(crate) fn new(id: SessionId, context: Box<dyn AutomationContext>) -> Self {
        Self {
            info: BrowserSession::new(id),
            context,
            last_used: Instant::now(),
        }
    }

    pub(crate) const fn id(&self) -> SessionId {
        self.info.id
    }
}

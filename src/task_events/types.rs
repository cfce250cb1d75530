//! Event type definitions for the task event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::browser_pool::SessionId;
use crate::task_engine::task_types::{TaskError, TaskId, WorkerId};

/// Events emitted as tasks move through their lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Created {
        task_id: TaskId,
        url: String,
        timestamp: DateTime<Utc>,
    },
    /// Admitted to the work queue, initially or after a retryable failure
    Queued {
        task_id: TaskId,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    Started {
        task_id: TaskId,
        worker_id: WorkerId,
        session_id: Option<SessionId>,
        timestamp: DateTime<Utc>,
    },
    Progress {
        task_id: TaskId,
        progress: u8,
        step: String,
        timestamp: DateTime<Utc>,
    },
    RetryScheduled {
        task_id: TaskId,
        attempt: u32,
        delay_ms: u64,
        error: TaskError,
        timestamp: DateTime<Utc>,
    },
    Completed {
        task_id: TaskId,
        from_cache: bool,
        timestamp: DateTime<Utc>,
    },
    Failed {
        task_id: TaskId,
        error: TaskError,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    /// A submission was answered from the result cache
    CacheHit {
        task_id: TaskId,
        url: String,
        timestamp: DateTime<Utc>,
    },
}

/// Helper functions for creating common events
impl TaskEvent {
    #[must_use]
    pub fn created(task_id: TaskId, url: impl Into<String>) -> Self {
        Self::Created {
            task_id,
            url: url.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn queued(task_id: TaskId, retry_count: u32) -> Self {
        Self::Queued {
            task_id,
            retry_count,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn started(task_id: TaskId, worker_id: WorkerId, session_id: Option<SessionId>) -> Self {
        Self::Started {
            task_id,
            worker_id,
            session_id,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn progress(task_id: TaskId, progress: u8, step: impl Into<String>) -> Self {
        Self::Progress {
            task_id,
            progress,
            step: step.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn retry_scheduled(task_id: TaskId, attempt: u32, delay_ms: u64, error: TaskError) -> Self {
        Self::RetryScheduled {
            task_id,
            attempt,
            delay_ms,
            error,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn completed(task_id: TaskId, from_cache: bool) -> Self {
        Self::Completed {
            task_id,
            from_cache,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(task_id: TaskId, error: TaskError) -> Self {
        Self::Failed {
            task_id,
            error,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn cancelled(task_id: TaskId) -> Self {
        Self::Cancelled {
            task_id,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn cache_hit(task_id: TaskId, url: impl Into<String>) -> Self {
        Self::CacheHit {
            task_id,
            url: url.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Created { task_id, .. }
            | Self::Queued { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::RetryScheduled { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id, .. }
            | Self::CacheHit { task_id, .. } => *task_id,
        }
    }

    /// Whether this is the last event a task will ever emit
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

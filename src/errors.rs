//! Error types for the orchestration engine
//!
//! `EngineError` is the single error type returned by the scheduler, pool,
//! tracker and worker. `DriverError` covers failures reported by the browser
//! automation layer. Both map onto a serializable `ErrorKind`, which is what
//! a FAILED task exposes and what `RetryPolicy` classifies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::task_engine::task_types::{TaskAction, TaskId, TaskStatus};

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error kinds exposed on failed tasks and used for retry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PoolTimeout,
    PoolClosed,
    QueueSaturated,
    StepTimeout,
    Validation,
    InvalidTransition,
    ResourceExhausted,
    /// Generic I/O or protocol timeout reported by the driver
    Timeout,
    ConnectionReset,
    NavigationTimeout,
    SessionCrashed,
    Authorization,
    MalformedUrl,
    QuotaExceeded,
    NotFound,
    Config,
    Unclassified,
}

/// How `RetryPolicy` treats an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry with exponential backoff up to the attempt budget
    Transient,
    /// Never retried
    Permanent,
    /// Retried once, then abandoned
    Unclassified,
}

impl ErrorKind {
    #[must_use]
    pub const fn retry_class(self) -> RetryClass {
        match self {
            Self::Timeout
            | Self::ConnectionReset
            | Self::NavigationTimeout
            | Self::StepTimeout
            | Self::PoolTimeout
            | Self::ResourceExhausted
            | Self::SessionCrashed => RetryClass::Transient,
            Self::Validation
            | Self::Authorization
            | Self::MalformedUrl
            | Self::InvalidTransition
            | Self::QuotaExceeded
            | Self::QueueSaturated
            | Self::PoolClosed
            | Self::NotFound
            | Self::Config => RetryClass::Permanent,
            Self::Unclassified => RetryClass::Unclassified,
        }
    }

    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self.retry_class(), RetryClass::Transient)
    }

    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self.retry_class(), RetryClass::Permanent)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::QueueSaturated => "queue_saturated",
            Self::StepTimeout => "step_timeout",
            Self::Validation => "validation",
            Self::InvalidTransition => "invalid_transition",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::NavigationTimeout => "navigation_timeout",
            Self::SessionCrashed => "session_crashed",
            Self::Authorization => "authorization",
            Self::MalformedUrl => "malformed_url",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::Config => "config",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a browser automation context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("browser session crashed: {0}")]
    SessionCrashed(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("access denied: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConnectionReset(_) => ErrorKind::ConnectionReset,
            Self::NavigationTimeout(_) => ErrorKind::NavigationTimeout,
            Self::SessionCrashed(_) => ErrorKind::SessionCrashed,
            Self::InvalidUrl(_) => ErrorKind::MalformedUrl,
            Self::Unauthorized(_) => ErrorKind::Authorization,
            Self::Protocol(_) | Self::Other(_) => ErrorKind::Unclassified,
        }
    }

    /// Whether the failure leaves the automation context in a state that
    /// must not be handed to another task
    #[must_use]
    pub const fn suggests_corruption(&self) -> bool {
        matches!(self, Self::SessionCrashed(_) | Self::Protocol(_))
    }

    /// Classify free-form driver error text by message patterns
    #[must_use]
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let msg = message.to_lowercase();

        if msg.contains("invalid url")
            || msg.contains("err_invalid_url")
            || msg.contains("cannot navigate to invalid")
        {
            return Self::InvalidUrl(message);
        }

        if msg.contains("401") || msg.contains("403") || msg.contains("unauthorized") {
            return Self::Unauthorized(message);
        }

        if msg.contains("navigation") && (msg.contains("timeout") || msg.contains("timed out")) {
            return Self::NavigationTimeout(message);
        }

        if msg.contains("timeout") || msg.contains("timed out") {
            return Self::Timeout(message);
        }

        if msg.contains("connection reset")
            || msg.contains("connection refused")
            || msg.contains("err_connection")
            || msg.contains("broken pipe")
        {
            return Self::ConnectionReset(message);
        }

        if msg.contains("target closed")
            || msg.contains("crash")
            || msg.contains("channel closed")
            || msg.contains("websocket")
        {
            return Self::SessionCrashed(message);
        }

        if msg.contains("cdp") || msg.contains("protocol") || msg.contains("deserialize") {
            return Self::Protocol(message);
        }

        Self::Other(message)
    }
}

/// Errors returned by engine operations
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No session became available within the acquire timeout
    #[error("timed out after {waited:?} waiting for a browser session")]
    PoolTimeout { waited: Duration },

    /// The session pool is shutting down
    #[error("browser session pool is shut down")]
    PoolClosed,

    /// Backpressure: the work queue is full
    #[error("work queue is saturated ({capacity} tasks waiting)")]
    QueueSaturated { capacity: usize },

    /// A parse step exceeded its budget
    #[error("step '{step}' exceeded its {timeout:?} budget")]
    StepTimeout { step: String, timeout: Duration },

    /// Malformed URL or options
    #[error("validation failed: {0}")]
    Validation(String),

    /// State machine misuse; always a bug in the caller
    #[error("invalid transition for task {task_id}: cannot {action} while {from}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        action: TaskAction,
    },

    /// Could not obtain a session within bound
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("principal '{principal}' already has {limit} tasks in flight")]
    QuotaExceeded { principal: String, limit: usize },

    #[error("browser error: {0}")]
    Browser(#[from] DriverError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolTimeout { .. } => ErrorKind::PoolTimeout,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::QueueSaturated { .. } => ErrorKind::QueueSaturated,
            Self::StepTimeout { .. } => ErrorKind::StepTimeout,
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::TaskNotFound(_) => ErrorKind::NotFound,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::Browser(e) => e.kind(),
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the failure suggests the browser session should be retired
    #[must_use]
    pub fn suggests_session_corruption(&self) -> bool {
        match self {
            Self::Browser(e) => e.suggests_corruption(),
            // The step future was dropped mid-operation; the page state is unknown
            Self::StepTimeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_classes() {
        assert!(ErrorKind::StepTimeout.is_transient());
        assert!(ErrorKind::NavigationTimeout.is_transient());
        assert!(ErrorKind::ConnectionReset.is_transient());
        assert!(ErrorKind::ResourceExhausted.is_transient());
        assert!(ErrorKind::Validation.is_permanent());
        assert!(ErrorKind::Authorization.is_permanent());
        assert!(ErrorKind::MalformedUrl.is_permanent());
        assert_eq!(ErrorKind::Unclassified.retry_class(), RetryClass::Unclassified);
    }

    #[test]
    fn test_classify_driver_messages() {
        assert_eq!(
            DriverError::classify_message("Navigation timeout of 30000 ms exceeded").kind(),
            ErrorKind::NavigationTimeout
        );
        assert_eq!(
            DriverError::classify_message("Request timed out").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            DriverError::classify_message("net::ERR_CONNECTION_RESET").kind(),
            ErrorKind::ConnectionReset
        );
        assert!(DriverError::classify_message("Target closed").suggests_corruption());
        assert_eq!(
            DriverError::classify_message("something odd").kind(),
            ErrorKind::Unclassified
        );
    }

    #[test]
    fn test_engine_error_kind_passthrough() {
        let err = EngineError::from(DriverError::InvalidUrl("x".into()));
        assert_eq!(err.kind(), ErrorKind::MalformedUrl);

        let timeout = EngineError::StepTimeout {
            step: "navigate".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.suggests_session_corruption());
        assert_eq!(timeout.kind(), ErrorKind::StepTimeout);
    }
}

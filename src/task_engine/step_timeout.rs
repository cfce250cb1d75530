//! Per-step time budgets
//!
//! The step future is dropped on expiry, which abandons the in-process wait.
//! The caller is expected to release the session as unhealthy afterwards so
//! whatever the browser was still doing dies with it.

use std::future::Future;
use std::time::Duration;

use super::task_types::ParseStep;
use crate::errors::{DriverError, EngineError, EngineResult};

/// Run one parse step under its budget
///
/// # Errors
/// `EngineError::StepTimeout` on expiry; driver failures become
/// `EngineError::Browser`.
pub async fn with_step_timeout<F, T>(step: ParseStep, timeout: Duration, operation: F) -> EngineResult<T>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::StepTimeout {
            step: step.label().to_string(),
            timeout,
        }),
    }
}

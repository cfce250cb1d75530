//! Retry decisions for failed parse attempts
//!
//! `RetryPolicy` holds no state and performs no I/O: given the kind of the
//! error and the number of the attempt that raised it, it answers whether
//! the task goes back on the queue and after what delay.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::errors::{ErrorKind, RetryClass};

/// Attempt budget for errors the taxonomy does not classify
const UNCLASSIFIED_ATTEMPT_LIMIT: u32 = 2;

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Abort,
}

impl RetryDecision {
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed
    #[must_use]
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        let jitter_fraction = rand::rng().random_range(0.0..=1.0);
        self.decide_with_jitter(kind, attempt, jitter_fraction)
    }

    /// Deterministic form of [`decide`](Self::decide)
    ///
    /// `jitter_fraction` in `[0, 1]` selects how much of the configured
    /// jitter is added on top of the backoff delay.
    #[must_use]
    pub fn decide_with_jitter(
        &self,
        kind: ErrorKind,
        attempt: u32,
        jitter_fraction: f64,
    ) -> RetryDecision {
        let limit = match kind.retry_class() {
            RetryClass::Permanent => return RetryDecision::Abort,
            RetryClass::Transient => self.config.max_attempts,
            RetryClass::Unclassified => self.config.max_attempts.min(UNCLASSIFIED_ATTEMPT_LIMIT),
        };

        if attempt >= limit {
            return RetryDecision::Abort;
        }

        RetryDecision::Retry {
            delay: self.backoff(attempt, jitter_fraction),
        }
    }

    /// Exponential delay for the retry that follows `attempt`, capped, plus jitter
    fn backoff(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = self.config.base_delay_ms.saturating_mul(1u64 << exponent);
        let capped = base.min(self.config.max_delay_ms);
        let jitter = (self.config.jitter_ms as f64 * jitter_fraction.clamp(0.0, 1.0)) as u64;
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 50,
        })
    }

    #[test]
    fn test_transient_errors_back_off_exponentially() {
        let policy = policy();
        assert_eq!(
            policy.decide_with_jitter(ErrorKind::NavigationTimeout, 1, 0.0),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide_with_jitter(ErrorKind::Timeout, 2, 0.0),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.decide_with_jitter(ErrorKind::ConnectionReset, 2, 1.0),
            RetryDecision::Retry {
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_transient_budget_is_exhausted_at_max_attempts() {
        let policy = policy();
        assert_eq!(
            policy.decide_with_jitter(ErrorKind::StepTimeout, 3, 0.0),
            RetryDecision::Abort
        );
        assert_eq!(policy.decide(ErrorKind::Timeout, 7), RetryDecision::Abort);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 50,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 0,
        });
        assert_eq!(
            policy.decide_with_jitter(ErrorKind::Timeout, 40, 0.5),
            RetryDecision::Retry {
                delay: Duration::from_millis(1_000)
            }
        );
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = policy();
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Authorization,
            ErrorKind::MalformedUrl,
            ErrorKind::InvalidTransition,
        ] {
            assert_eq!(policy.decide(kind, 1), RetryDecision::Abort, "{kind}");
        }
    }

    #[test]
    fn test_unclassified_errors_retry_once() {
        let policy = policy();
        assert!(policy.decide(ErrorKind::Unclassified, 1).is_retry());
        assert_eq!(policy.decide(ErrorKind::Unclassified, 2), RetryDecision::Abort);

        let single = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        });
        assert_eq!(single.decide(ErrorKind::Unclassified, 1), RetryDecision::Abort);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = policy();
        for _ in 0..100 {
            match policy.decide(ErrorKind::Timeout, 1) {
                RetryDecision::Retry { delay } => {
                    assert!(delay >= Duration::from_millis(100));
                    assert!(delay <= Duration::from_millis(150));
                }
                RetryDecision::Abort => panic!("first transient failure must retry"),
            }
        }
    }
}

//! Execution of a single parse attempt
//!
//! A worker leases a session, walks the parse steps in order while
//! reporting progress, and settles the attempt: cache write and completion
//! on success, a retry decision on failure, a quiet unwind on cancellation.
//! The session is always released before the task is settled as failed, so
//! a retry gets a fresh lease.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::retry_policy::{RetryDecision, RetryPolicy};
use super::step_timeout::with_step_timeout;
use super::task_types::{ParseStep, ResultRef, TaskError, TaskStatus, WorkerId};
use super::tracker::TaskStatusTracker;
use super::work_queue::WorkItem;
use crate::browser_pool::{BrowserSessionPool, NavigateOptions, ReleaseOutcome, SessionLease};
use crate::config::StepTimeouts;
use crate::errors::{DriverError, EngineError};
use crate::page_extractor::label_elements;
use crate::page_extractor::schema::ParseResult;
use crate::result_cache::ResultCache;
use crate::task_events::TaskEvent;

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Back in QUEUED; the item should be redelivered after `delay`
    Requeued { delay: Duration },
}

/// Why the step sequence stopped early
enum Interrupt {
    Cancelled,
    Failed(EngineError),
}

impl From<EngineError> for Interrupt {
    fn from(err: EngineError) -> Self {
        Self::Failed(err)
    }
}

pub struct ParsingWorker {
    pool: Arc<BrowserSessionPool>,
    tracker: Arc<TaskStatusTracker>,
    cache: Arc<ResultCache>,
    policy: RetryPolicy,
    step_timeouts: StepTimeouts,
    acquire_timeout: Duration,
    session_call_timeout: Duration,
}

impl ParsingWorker {
    #[must_use]
    pub fn new(
        pool: Arc<BrowserSessionPool>,
        tracker: Arc<TaskStatusTracker>,
        cache: Arc<ResultCache>,
        policy: RetryPolicy,
        step_timeouts: StepTimeouts,
    ) -> Self {
        let acquire_timeout = pool.config().acquire_timeout();
        let session_call_timeout = pool.config().session_call_timeout();
        Self {
            pool,
            tracker,
            cache,
            policy,
            step_timeouts,
            acquire_timeout,
            session_call_timeout,
        }
    }

    /// Run one attempt of `item` end to end
    pub async fn run(&self, item: &WorkItem, worker_id: WorkerId) -> WorkerOutcome {
        let id = item.task_id;

        if item.cancel.is_cancelled() {
            return WorkerOutcome::Cancelled;
        }

        if let Err(e) = self.tracker.mark_processing(id, worker_id, None) {
            return self.tracker_rejected(item, &e);
        }
        debug!(task_id = %id, worker = %worker_id, url = %item.url, "Attempt started");

        let mut lease = match self.pool.acquire(id, self.acquire_timeout).await {
            Ok(lease) => lease,
            Err(EngineError::PoolTimeout { waited }) => {
                let err = EngineError::ResourceExhausted(format!(
                    "no browser session became available within {waited:?}"
                ));
                return self.settle_failure(item, err);
            }
            Err(e) => return self.settle_failure(item, e),
        };

        if let Err(e) = self.tracker.attach_session(id, lease.id()) {
            self.pool.release(lease, ReleaseOutcome::healthy(0)).await;
            return self.tracker_rejected(item, &e);
        }

        let mut pages_served = 0;
        let attempt = self.execute(item, &mut lease, &mut pages_served).await;

        match attempt {
            Ok(result) => {
                let release = self.read_memory_estimate(item, &mut lease, pages_served).await;
                let payload = Arc::new(result);
                self.cache
                    .put(item.fingerprint.clone(), Arc::clone(&payload), self.cache.default_ttl());

                let completed = self.tracker.complete(
                    id,
                    ResultRef {
                        fingerprint: item.fingerprint.clone(),
                        from_cache: false,
                        payload,
                    },
                );
                self.pool.release(lease, release).await;

                match completed {
                    Ok(()) => {
                        info!(task_id = %id, worker = %worker_id, "Task completed");
                        WorkerOutcome::Completed
                    }
                    Err(e) => self.tracker_rejected(item, &e),
                }
            }
            Err(Interrupt::Cancelled) => {
                self.pool
                    .release(lease, ReleaseOutcome::healthy(pages_served))
                    .await;
                info!(task_id = %id, worker = %worker_id, "Task cancelled, session released");
                WorkerOutcome::Cancelled
            }
            Err(Interrupt::Failed(err)) => {
                let outcome = if err.suggests_session_corruption() {
                    warn!(task_id = %id, session = %lease.id(), "Releasing session as unhealthy: {err}");
                    ReleaseOutcome::unhealthy(pages_served)
                } else {
                    ReleaseOutcome::healthy(pages_served)
                };
                self.pool.release(lease, outcome).await;
                self.settle_failure(item, err)
            }
        }
    }

    /// Read the session's memory estimate for the release decision
    ///
    /// A backend that does not answer in time leaves the estimate unknown and
    /// marks the session unhealthy; the parse result itself stands.
    async fn read_memory_estimate(
        &self,
        item: &WorkItem,
        lease: &mut SessionLease,
        pages_served: u32,
    ) -> ReleaseOutcome {
        let budget = self.session_call_timeout;
        match tokio::time::timeout(budget, lease.context().memory_usage()).await {
            Ok(memory) => ReleaseOutcome::healthy(pages_served).with_memory(memory),
            Err(_) => {
                warn!(
                    task_id = %item.task_id,
                    session = %lease.id(),
                    "Memory estimate timed out after {budget:?}, releasing session as unhealthy"
                );
                ReleaseOutcome::unhealthy(pages_served)
            }
        }
    }

    /// The five parse steps in order
    async fn execute(
        &self,
        item: &WorkItem,
        lease: &mut SessionLease,
        pages_served: &mut u32,
    ) -> Result<ParseResult, Interrupt> {
        let options = item.options;
        let ctx = lease.context();

        let navigate = NavigateOptions {
            wait_for_dynamic_content: options.wait_for_dynamic_content,
        };
        *pages_served = 1;
        let navigation = self
            .step(item, ParseStep::Navigate, ctx.navigate(&item.url, navigate))
            .await?;

        let (structure, metadata) = self
            .step(item, ParseStep::ExtractStructure, async {
                let structure = ctx.extract_structure().await?;
                let metadata = if options.include_metadata {
                    Some(ctx.extract_metadata().await?)
                } else {
                    None
                };
                Ok::<_, DriverError>((structure, metadata))
            })
            .await?;

        let elements = self
            .step(item, ParseStep::IdentifyInteractive, ctx.interactive_elements())
            .await?;

        let page_url = navigation.final_url.clone();
        let labeled = self
            .step(item, ParseStep::SemanticLabeling, async {
                Ok::<_, DriverError>(label_elements(&page_url, &elements))
            })
            .await?;

        let artifact = self
            .step(item, ParseStep::CaptureArtifact, ctx.capture_artifact())
            .await?;

        // Last boundary before the result becomes visible
        self.checkpoint(item)?;

        Ok(ParseResult {
            url: item.url.clone(),
            final_url: navigation.final_url,
            status_code: navigation.status_code,
            structure,
            metadata,
            elements: labeled,
            artifact: Some(artifact),
            parsed_at: Utc::now(),
        })
    }

    /// Report the step's start, run it under its budget, report its end
    async fn step<T, F>(&self, item: &WorkItem, step: ParseStep, operation: F) -> Result<T, Interrupt>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let (start, end) = step.progress_range();

        self.checkpoint(item)?;
        self.report(item, start, step)?;

        let timeout = self.step_timeouts.for_step(step);
        let value = with_step_timeout(step, timeout, operation).await.map_err(|e| {
            debug!(task_id = %item.task_id, step = %step, "Step failed: {e}");
            e
        })?;

        self.report(item, end, step)?;
        Ok(value)
    }

    fn checkpoint(&self, item: &WorkItem) -> Result<(), Interrupt> {
        if item.cancel.is_cancelled() {
            debug!(task_id = %item.task_id, "Cancellation observed at step boundary");
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn report(&self, item: &WorkItem, percentage: u8, step: ParseStep) -> Result<(), Interrupt> {
        match self.tracker.update_progress(item.task_id, percentage, step.label()) {
            Ok(_) => Ok(()),
            Err(EngineError::InvalidTransition { .. }) if item.cancel.is_cancelled() => {
                Err(Interrupt::Cancelled)
            }
            Err(e) => Err(Interrupt::Failed(e)),
        }
    }

    /// Consult the retry policy and move the task to QUEUED or FAILED
    fn settle_failure(&self, item: &WorkItem, err: EngineError) -> WorkerOutcome {
        let id = item.task_id;
        if item.cancel.is_cancelled() {
            return WorkerOutcome::Cancelled;
        }

        let attempt = self.tracker.get(id).map_or(0, |view| view.retry_count) + 1;
        let decision = match err {
            // A state machine violation is a bug; retrying cannot fix it
            EngineError::InvalidTransition { .. } => RetryDecision::Abort,
            _ => self.policy.decide(err.kind(), attempt),
        };

        match self.tracker.fail(id, &err, decision.is_retry()) {
            Ok(TaskStatus::Queued) => {
                let delay = match decision {
                    RetryDecision::Retry { delay } => delay,
                    RetryDecision::Abort => Duration::ZERO,
                };
                warn!(
                    task_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying: {err}"
                );
                self.tracker.events().publish(TaskEvent::retry_scheduled(
                    id,
                    attempt,
                    delay.as_millis() as u64,
                    TaskError::from(&err),
                ));
                WorkerOutcome::Requeued { delay }
            }
            Ok(_) => {
                warn!(task_id = %id, attempt, kind = %err.kind(), "Task failed: {err}");
                WorkerOutcome::Failed
            }
            Err(e) => self.tracker_rejected(item, &e),
        }
    }

    /// The tracker refused a transition: expected after a cancel, a bug otherwise
    fn tracker_rejected(&self, item: &WorkItem, err: &EngineError) -> WorkerOutcome {
        if item.cancel.is_cancelled()
            || self.tracker.status(item.task_id) == Some(TaskStatus::Cancelled)
        {
            debug!(task_id = %item.task_id, "Task was cancelled: {err}");
            return WorkerOutcome::Cancelled;
        }
        error!(task_id = %item.task_id, "Unexpected task state: {err}");
        WorkerOutcome::Failed
    }
}

//! Admission and dispatch of parse requests
//!
//! `TaskScheduler` owns every component and is the only entry point callers
//! need: `submit` answers from the cache or admits the task to the bounded
//! work queue, and a fixed set of workers (never more than the pool has
//! sessions) drains the queue one task at a time.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry_policy::RetryPolicy;
use super::task_types::{
    CancellationFlag, ParseOptions, ResultRef, SubmitRequest, TaskId, TaskView, WorkerId,
};
use super::tracker::{NewTask, TaskStatusTracker};
use super::work_queue::{WorkItem, WorkQueue};
use super::worker::{ParsingWorker, WorkerOutcome};
use crate::browser_pool::{BrowserSessionPool, PoolShutdownReport, PoolStats, SessionDriver};
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::result_cache::{CacheStats, ResultCache};
use crate::task_events::{TaskEvent, TaskEventBus, TaskEventStream};
use crate::utils::url_utils::{fingerprint, normalize_url};

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub workers: usize,
    pub in_flight: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub tracked_tasks: usize,
    pub accepting: bool,
    pub pool: PoolStats,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ShutdownReport {
    /// Workers that had not finished their task by the drain deadline
    pub workers_aborted: usize,
    /// Admitted tasks moved to CANCELLED because they never got to run
    pub tasks_cancelled: usize,
    pub pool: PoolShutdownReport,
}

/// State shared by the worker loops
struct Dispatcher {
    queue: WorkQueue,
    worker: ParsingWorker,
    tracker: Arc<TaskStatusTracker>,
    /// Flags of admitted tasks that have not settled yet
    cancel_flags: DashMap<TaskId, CancellationFlag>,
    in_flight: AtomicUsize,
}

impl Dispatcher {
    async fn worker_loop(self: Arc<Self>, worker_id: WorkerId, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = %worker_id, "Worker started");

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                item = self.queue.next() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if item.cancel.is_cancelled() {
                debug!(task_id = %item.task_id, "Skipping cancelled task");
                self.cancel_flags.remove(&item.task_id);
                continue;
            }

            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let outcome = self.worker.run(&item, worker_id).await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);

            match outcome {
                WorkerOutcome::Requeued { delay } => {
                    Arc::clone(&self).schedule_requeue(item, delay, shutdown.clone());
                }
                WorkerOutcome::Completed | WorkerOutcome::Failed | WorkerOutcome::Cancelled => {
                    self.cancel_flags.remove(&item.task_id);
                }
            }
        }

        debug!(worker = %worker_id, "Worker exiting");
    }

    /// Redeliver a retried task after its backoff delay
    fn schedule_requeue(self: Arc<Self>, item: WorkItem, delay: Duration, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            let stopped = tokio::select! {
                () = tokio::time::sleep(delay) => false,
                _ = shutdown.changed() => true,
            };

            let item = if stopped || item.cancel.is_cancelled() {
                item
            } else {
                match self.queue.requeue(item).await {
                    Ok(()) => return,
                    Err(item) => item,
                }
            };
            self.abandon(&item);
        });
    }

    /// Settle a task that will never run again
    ///
    /// Returns whether the task was moved to CANCELLED.
    fn abandon(&self, item: &WorkItem) -> bool {
        self.cancel_flags.remove(&item.task_id);
        item.cancel.cancel();

        let unfinished = self
            .tracker
            .status(item.task_id)
            .is_some_and(|status| !status.is_terminal());
        if !unfinished {
            return false;
        }

        match self.tracker.cancel(item.task_id) {
            Ok(()) => {
                info!(task_id = %item.task_id, "Task cancelled on shutdown");
                true
            }
            Err(e) => {
                debug!(task_id = %item.task_id, "Task settled concurrently: {e}");
                false
            }
        }
    }
}

pub struct TaskScheduler {
    config: EngineConfig,
    pool: Arc<BrowserSessionPool>,
    cache: Arc<ResultCache>,
    tracker: Arc<TaskStatusTracker>,
    dispatch: Arc<Dispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    accepting: AtomicBool,
    worker_count: usize,
}

impl TaskScheduler {
    /// Build the engine and start its workers and background sweeps
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `EngineError::Config` when `config` fails validation.
    pub fn new(config: EngineConfig, driver: Arc<dyn SessionDriver>) -> EngineResult<Self> {
        config.validate()?;

        let events = Arc::new(TaskEventBus::new(config.scheduler.event_channel_capacity));
        let tracker = Arc::new(TaskStatusTracker::new(events));
        let cache = Arc::new(ResultCache::new(&config.cache));
        let pool = BrowserSessionPool::new(config.pool.clone(), driver);

        let worker = ParsingWorker::new(
            Arc::clone(&pool),
            Arc::clone(&tracker),
            Arc::clone(&cache),
            RetryPolicy::new(config.retry.clone()),
            config.step_timeouts.clone(),
        );

        let dispatch = Arc::new(Dispatcher {
            queue: WorkQueue::new(config.scheduler.queue_capacity),
            worker,
            tracker: Arc::clone(&tracker),
            cancel_flags: DashMap::new(),
            in_flight: AtomicUsize::new(0),
        });

        // More workers than sessions would only queue inside the pool
        let worker_count = config.scheduler.concurrency.min(config.pool.max_sessions).max(1);
        let (shutdown_tx, _) = watch::channel(false);

        let workers = (0..worker_count)
            .map(|n| {
                let dispatch = Arc::clone(&dispatch);
                tokio::spawn(dispatch.worker_loop(WorkerId(n), shutdown_tx.subscribe()))
            })
            .collect();

        let mut background = vec![
            Arc::clone(&tracker).start_cleanup_task(config.scheduler.task_retention()),
        ];
        if let Some(period) = config.cache.cleanup_interval() {
            background.push(Arc::clone(&cache).start_cleanup_task(period));
        }

        pool.start_maintenance();
        let warm_pool = Arc::clone(&pool);
        background.push(tokio::spawn(async move {
            warm_pool.warm_up().await;
        }));

        info!(
            workers = worker_count,
            max_sessions = config.pool.max_sessions,
            queue_capacity = config.scheduler.queue_capacity,
            "Task scheduler started"
        );

        Ok(Self {
            config,
            pool,
            cache,
            tracker,
            dispatch,
            workers: Mutex::new(workers),
            background: Mutex::new(background),
            shutdown_tx,
            accepting: AtomicBool::new(true),
            worker_count,
        })
    }

    /// Submit `url` for parsing
    ///
    /// # Errors
    /// See [`submit_request`](Self::submit_request).
    pub fn submit(&self, url: &str, options: ParseOptions) -> EngineResult<TaskId> {
        self.submit_request(SubmitRequest::new(url).with_options(options))
    }

    /// Submit a request on behalf of an optional principal
    ///
    /// A fresh cached result for the same URL and options yields a task that
    /// is already COMPLETED; nothing is dispatched. Otherwise the task is
    /// created, queued and left for a worker. Never waits for capacity.
    ///
    /// # Errors
    /// `Validation` for a malformed URL, `QueueSaturated` when the work
    /// queue is full, `QuotaExceeded` when the principal is at its in-flight
    /// limit, `PoolClosed` after shutdown.
    pub fn submit_request(&self, request: SubmitRequest) -> EngineResult<TaskId> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::PoolClosed);
        }

        let normalized = normalize_url(&request.url)?;
        let fingerprint = fingerprint(&normalized, &request.options);
        let task = NewTask {
            url: normalized.to_string(),
            fingerprint: fingerprint.clone(),
            options: request.options,
            principal: request.principal,
        };

        if request.options.force_refresh {
            if self.cache.invalidate(&fingerprint) {
                debug!(url = %task.url, "Forced refresh dropped cached result");
            }
        } else if let Some(payload) = self.cache.get(&fingerprint) {
            let id = self.tracker.create_completed(
                task,
                ResultRef {
                    fingerprint,
                    from_cache: true,
                    payload,
                },
            );
            info!(task_id = %id, "Submission answered from cache");
            return Ok(id);
        }

        // Reserve first so a saturated queue leaves no task record behind
        let slot = self.dispatch.queue.reserve()?;
        let url = task.url.clone();
        let options = task.options;
        let id = self
            .tracker
            .create(task, self.config.scheduler.max_inflight_per_principal)?;
        self.tracker.mark_queued(id)?;

        let cancel = CancellationFlag::new();
        self.dispatch.cancel_flags.insert(id, cancel.clone());
        slot.send(WorkItem {
            task_id: id,
            url,
            fingerprint,
            options,
            cancel,
        });

        debug!(task_id = %id, queue_depth = self.dispatch.queue.depth(), "Task admitted");
        Ok(id)
    }

    /// Cancel a task that has not finished
    ///
    /// A queued task is skipped when it reaches a worker; a running task
    /// stops at its next step boundary and releases its session.
    ///
    /// # Errors
    /// `TaskNotFound`, or `InvalidTransition` if the task already finished.
    pub fn cancel(&self, id: TaskId) -> EngineResult<()> {
        // Flag first so the worker never mistakes the tracker's refusal for a bug
        if let Some(flag) = self.dispatch.cancel_flags.get(&id) {
            flag.cancel();
        }
        self.tracker.cancel(id)?;
        info!(task_id = %id, "Task cancelled");
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<TaskView> {
        self.tracker.get(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<TaskView> {
        self.tracker.list()
    }

    /// Every event for every task
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tracker.events().subscribe()
    }

    /// Events of one task, ending after its terminal event
    #[must_use]
    pub fn subscribe_task(&self, id: TaskId) -> TaskEventStream {
        self.tracker.events().subscribe_task(id)
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.worker_count,
            in_flight: self.dispatch.in_flight.load(Ordering::Acquire),
            queue_depth: self.dispatch.queue.depth(),
            queue_capacity: self.dispatch.queue.capacity(),
            tracked_tasks: self.tracker.len(),
            accepting: self.accepting.load(Ordering::Acquire),
            pool: self.pool.stats(),
            cache: self.cache.stats(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BrowserSessionPool> {
        &self.pool
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<TaskStatusTracker> {
        &self.tracker
    }

    /// Stop admissions and wind the engine down
    ///
    /// Running tasks get until `drain_timeout` to finish; workers still busy
    /// after that are aborted. Every admitted task that did not finish is
    /// moved to CANCELLED, then the pool is shut down with whatever remains
    /// of the drain budget.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!("Shutting down task scheduler");

        let deadline = Instant::now() + drain_timeout;
        self.shutdown_tx.send_replace(true);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let mut workers_aborted = 0;
        for mut handle in workers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                workers_aborted += 1;
            }
        }
        if workers_aborted > 0 {
            warn!("{workers_aborted} worker(s) aborted at the drain deadline");
        }

        let mut tasks_cancelled = 0;
        for item in self.dispatch.queue.close().await {
            if self.dispatch.abandon(&item) {
                tasks_cancelled += 1;
            }
        }

        // Tasks whose worker was aborted mid-attempt
        let stranded: Vec<TaskId> = self
            .dispatch
            .cancel_flags
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in stranded {
            if let Some((_, flag)) = self.dispatch.cancel_flags.remove(&id) {
                flag.cancel();
            }
            let unfinished = self.tracker.status(id).is_some_and(|s| !s.is_terminal());
            if unfinished && self.tracker.cancel(id).is_ok() {
                tasks_cancelled += 1;
            }
        }

        for handle in self.background.lock().drain(..) {
            handle.abort();
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let pool = self.pool.shutdown(remaining).await;

        let report = ShutdownReport {
            workers_aborted,
            tasks_cancelled,
            pool,
        };
        info!(
            workers_aborted = report.workers_aborted,
            tasks_cancelled = report.tasks_cancelled,
            "Task scheduler shut down"
        );
        report
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.pool.stop_maintenance();
    }
}

//! Authoritative task lifecycle records
//!
//! Every mutation goes through the state machine in `TaskStatus::apply`.
//! Records live behind their own mutex so updates to one task never wait
//! on another; the map itself is only touched to insert, look up or purge.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::task_types::{
    ParseOptions, ResultRef, TaskAction, TaskError, TaskId, TaskStatus, TaskView, WorkerId,
};
use crate::browser_pool::SessionId;
use crate::errors::{EngineError, EngineResult};
use crate::task_events::{TaskEvent, TaskEventBus};
use crate::utils::url_utils::Fingerprint;

/// Initial capacity of the task map
const TASK_MAP_INITIAL_CAPACITY: usize = 256;

/// Everything needed to register a task
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Normalized target URL
    pub url: String,
    pub fingerprint: Fingerprint,
    pub options: ParseOptions,
    pub principal: Option<String>,
}

#[derive(Debug)]
struct TaskRecord {
    id: TaskId,
    url: String,
    fingerprint: Fingerprint,
    options: ParseOptions,
    principal: Option<String>,
    status: TaskStatus,
    /// Visible progress; never decreases over the life of the task
    progress: u8,
    /// Highest value reported during the current processing attempt
    attempt_progress: u8,
    current_step: Option<String>,
    created_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    worker_id: Option<WorkerId>,
    session_id: Option<SessionId>,
    retry_count: u32,
    last_error: Option<TaskError>,
    result: Option<ResultRef>,
    finished_at: Option<Instant>,
}

impl TaskRecord {
    fn new(id: TaskId, task: NewTask) -> Self {
        Self {
            id,
            url: task.url,
            fingerprint: task.fingerprint,
            options: task.options,
            principal: task.principal,
            status: TaskStatus::Created,
            progress: 0,
            attempt_progress: 0,
            current_step: None,
            created_at: Utc::now(),
            processing_started_at: None,
            processing_completed_at: None,
            worker_id: None,
            session_id: None,
            retry_count: 0,
            last_error: None,
            result: None,
            finished_at: None,
        }
    }

    fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            url: self.url.clone(),
            options: self.options,
            principal: self.principal.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            created_at: self.created_at,
            processing_started_at: self.processing_started_at,
            processing_completed_at: self.processing_completed_at,
            worker_id: self.worker_id,
            session_id: self.session_id,
            retry_count: self.retry_count,
            // Cancellation is not a failure
            error: if self.status == TaskStatus::Failed {
                self.last_error.clone()
            } else {
                None
            },
            result: self.result.clone(),
        }
    }
}

/// Thread-safe registry of task records
pub struct TaskStatusTracker {
    tasks: DashMap<TaskId, Arc<Mutex<TaskRecord>>>,
    /// Non-terminal task count per principal
    inflight_by_principal: DashMap<String, usize>,
    events: Arc<TaskEventBus>,
}

impl TaskStatusTracker {
    #[must_use]
    pub fn new(events: Arc<TaskEventBus>) -> Self {
        Self {
            tasks: DashMap::with_capacity(TASK_MAP_INITIAL_CAPACITY),
            inflight_by_principal: DashMap::new(),
            events,
        }
    }

    #[must_use]
    pub fn events(&self) -> &Arc<TaskEventBus> {
        &self.events
    }

    /// Register a new task in CREATED state
    ///
    /// With a `quota`, the principal (if any) may own at most that many
    /// non-terminal tasks; the check and the registration are atomic.
    ///
    /// # Errors
    /// Returns `EngineError::QuotaExceeded` when the principal is at its limit.
    pub fn create(&self, task: NewTask, quota: Option<usize>) -> EngineResult<TaskId> {
        if let Some(principal) = &task.principal {
            let mut inflight = self.inflight_by_principal.entry(principal.clone()).or_insert(0);
            if let Some(limit) = quota
                && *inflight >= limit
            {
                debug!(principal = %principal, limit, "Rejecting submission over quota");
                return Err(EngineError::QuotaExceeded {
                    principal: principal.clone(),
                    limit,
                });
            }
            *inflight += 1;
        }

        let id = TaskId::new();
        let url = task.url.clone();
        self.tasks
            .insert(id, Arc::new(Mutex::new(TaskRecord::new(id, task))));
        debug!(task_id = %id, url = %url, "Task created");
        self.events.publish(TaskEvent::created(id, url));
        Ok(id)
    }

    /// Register a task that is already COMPLETED with a cached result
    pub fn create_completed(&self, task: NewTask, result: ResultRef) -> TaskId {
        let id = TaskId::new();
        let url = task.url.clone();
        let mut record = TaskRecord::new(id, task);
        let now = Utc::now();
        record.status = TaskStatus::Completed;
        record.progress = 100;
        record.processing_started_at = Some(now);
        record.processing_completed_at = Some(now);
        record.result = Some(result);
        record.finished_at = Some(Instant::now());
        self.tasks.insert(id, Arc::new(Mutex::new(record)));

        debug!(task_id = %id, url = %url, "Task answered from cache");
        self.events.publish(TaskEvent::cache_hit(id, url));
        self.events.publish(TaskEvent::completed(id, true));
        id
    }

    /// CREATED -> QUEUED
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition`.
    pub fn mark_queued(&self, id: TaskId) -> EngineResult<()> {
        self.mutate(id, TaskAction::Queue, |record| {
            TaskEvent::queued(record.id, record.retry_count)
        })
    }

    /// CREATED/QUEUED -> PROCESSING
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` (terminal or already processing).
    pub fn mark_processing(
        &self,
        id: TaskId,
        worker_id: WorkerId,
        session_id: Option<SessionId>,
    ) -> EngineResult<()> {
        self.mutate(id, TaskAction::StartProcessing, |record| {
            record.worker_id = Some(worker_id);
            record.session_id = session_id;
            record.attempt_progress = 0;
            record.current_step = None;
            if record.processing_started_at.is_none() {
                record.processing_started_at = Some(Utc::now());
            }
            TaskEvent::started(record.id, worker_id, session_id)
        })
    }

    /// Record the session leased for the current attempt
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` unless PROCESSING.
    pub fn attach_session(&self, id: TaskId, session_id: SessionId) -> EngineResult<()> {
        self.mutate_quiet(id, TaskAction::AttachSession, |record| {
            record.session_id = Some(session_id);
        })
    }

    /// Record progress for a PROCESSING task
    ///
    /// Values above 100 are capped. A value below one already reported is
    /// clamped to the recorded value and logged as an anomaly. Returns the
    /// progress now recorded.
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` unless PROCESSING.
    pub fn update_progress(&self, id: TaskId, percentage: u8, step: &str) -> EngineResult<u8> {
        let mut recorded = 0;
        self.mutate(id, TaskAction::UpdateProgress, |record| {
            let requested = percentage.min(100);
            if requested < record.attempt_progress {
                warn!(
                    task_id = %record.id,
                    requested,
                    recorded = record.attempt_progress,
                    step,
                    "Out-of-order progress update clamped"
                );
            }
            record.attempt_progress = record.attempt_progress.max(requested);
            record.progress = record.progress.max(requested);
            record.current_step = Some(step.to_string());
            recorded = record.progress;
            TaskEvent::progress(record.id, record.progress, step)
        })?;
        Ok(recorded)
    }

    /// PROCESSING -> COMPLETED
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` unless PROCESSING.
    pub fn complete(&self, id: TaskId, result: ResultRef) -> EngineResult<()> {
        self.mutate(id, TaskAction::Complete, |record| {
            let from_cache = result.from_cache;
            record.progress = 100;
            record.attempt_progress = 100;
            record.result = Some(result);
            record.last_error = None;
            record.processing_completed_at = Some(Utc::now());
            TaskEvent::completed(record.id, from_cache)
        })
    }

    /// PROCESSING -> QUEUED (retry) or PROCESSING -> FAILED
    ///
    /// With `retry_eligible` the task goes back to QUEUED and its retry
    /// count is incremented; otherwise it fails permanently. The error is
    /// kept verbatim either way. Returns the resulting status.
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` unless PROCESSING.
    pub fn fail(
        &self,
        id: TaskId,
        error: &EngineError,
        retry_eligible: bool,
    ) -> EngineResult<TaskStatus> {
        let task_error = TaskError::from(error);
        let action = if retry_eligible {
            TaskAction::Requeue
        } else {
            TaskAction::Fail
        };

        self.mutate(id, action, |record| {
            record.last_error = Some(task_error.clone());
            record.worker_id = None;
            record.session_id = None;
            if retry_eligible {
                record.retry_count += 1;
                TaskEvent::queued(record.id, record.retry_count)
            } else {
                record.processing_completed_at = Some(Utc::now());
                TaskEvent::failed(record.id, task_error)
            }
        })?;

        Ok(if retry_eligible {
            TaskStatus::Queued
        } else {
            TaskStatus::Failed
        })
    }

    /// Any non-terminal state -> CANCELLED
    ///
    /// # Errors
    /// `TaskNotFound` or `InvalidTransition` if the task already finished.
    pub fn cancel(&self, id: TaskId) -> EngineResult<()> {
        self.mutate(id, TaskAction::Cancel, |record| {
            record.last_error = None;
            record.processing_completed_at = Some(Utc::now());
            TaskEvent::cancelled(record.id)
        })
    }

    /// Read-only snapshot of a task
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<TaskView> {
        let record = self.record(id).ok()?;
        let view = record.lock().view();
        Some(view)
    }

    #[must_use]
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        let record = self.record(id).ok()?;
        let status = record.lock().status;
        Some(status)
    }

    #[must_use]
    pub fn fingerprint(&self, id: TaskId) -> Option<Fingerprint> {
        let record = self.record(id).ok()?;
        let fingerprint = record.lock().fingerprint.clone();
        Some(fingerprint)
    }

    /// Snapshots of every tracked task
    #[must_use]
    pub fn list(&self) -> Vec<TaskView> {
        let records: Vec<_> = self.tasks.iter().map(|e| Arc::clone(e.value())).collect();
        records.iter().map(|r| r.lock().view()).collect()
    }

    /// Non-terminal tasks currently owned by `principal`
    #[must_use]
    pub fn inflight_for_principal(&self, principal: &str) -> usize {
        self.inflight_by_principal
            .get(principal)
            .map_or(0, |count| *count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove terminal records that finished more than `retention` ago
    ///
    /// Returns the number of records removed.
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.tasks.len();
        self.tasks.retain(|_, record| {
            record
                .lock()
                .finished_at
                .is_none_or(|finished| now.saturating_duration_since(finished) < retention)
        });
        let removed = before.saturating_sub(self.tasks.len());
        if removed > 0 {
            info!("Purged {removed} finished task records");
        }
        removed
    }

    /// Spawn the periodic retention sweep
    pub fn start_cleanup_task(self: Arc<Self>, retention: Duration) -> JoinHandle<()> {
        let period = (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.purge_finished(retention);
            }
        })
    }

    fn record(&self, id: TaskId) -> EngineResult<Arc<Mutex<TaskRecord>>> {
        self.tasks
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Apply `action` under the task's lock and publish the event `apply` builds
    fn mutate<F>(&self, id: TaskId, action: TaskAction, apply: F) -> EngineResult<()>
    where
        F: FnOnce(&mut TaskRecord) -> TaskEvent,
    {
        let record = self.record(id)?;
        let mut record = record.lock();
        let event = self.transition(&mut record, action, apply)?;
        // Published under the record lock so per-task event order matches mutation order
        self.events.publish(event);
        Ok(())
    }

    fn mutate_quiet<F>(&self, id: TaskId, action: TaskAction, apply: F) -> EngineResult<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let record = self.record(id)?;
        let mut record = record.lock();
        self.transition(&mut record, action, apply)
    }

    fn transition<T, F>(&self, record: &mut TaskRecord, action: TaskAction, apply: F) -> EngineResult<T>
    where
        F: FnOnce(&mut TaskRecord) -> T,
    {
        let from = record.status;
        let Some(to) = from.apply(action) else {
            debug!(task_id = %record.id, %from, %action, "Rejected task transition");
            return Err(EngineError::InvalidTransition {
                task_id: record.id,
                from,
                action,
            });
        };

        record.status = to;
        let out = apply(record);

        if to.is_terminal() && !from.is_terminal() {
            record.finished_at = Some(Instant::now());
            if let Some(principal) = &record.principal {
                self.release_principal_slot(principal);
            }
        }
        if from != to {
            debug!(task_id = %record.id, %from, %to, "Task transition");
        }
        Ok(out)
    }

    fn release_principal_slot(&self, principal: &str) {
        let now_empty = match self.inflight_by_principal.get_mut(principal) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_empty {
            self.inflight_by_principal.remove_if(principal, |_, count| *count == 0);
        }
    }
}

impl Default for TaskStatusTracker {
    fn default() -> Self {
        Self::new(Arc::new(TaskEventBus::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DriverError, ErrorKind};

    fn new_task(principal: Option<&str>) -> NewTask {
        let url = url::Url::parse("https://example.com/").expect("static url");
        NewTask {
            url: url.to_string(),
            fingerprint: crate::utils::url_utils::fingerprint(&url, &ParseOptions::default()),
            options: ParseOptions::default(),
            principal: principal.map(str::to_string),
        }
    }

    fn processing(tracker: &TaskStatusTracker) -> TaskId {
        let id = tracker.create(new_task(None), None).expect("create");
        tracker.mark_queued(id).expect("queue");
        tracker
            .mark_processing(id, WorkerId(0), None)
            .expect("start processing");
        id
    }

    #[test]
    fn test_progress_is_clamped_not_rejected() {
        let tracker = TaskStatusTracker::default();
        let id = processing(&tracker);

        assert_eq!(tracker.update_progress(id, 40, "extract").expect("update"), 40);
        assert_eq!(tracker.update_progress(id, 10, "late").expect("update"), 40);
        assert_eq!(tracker.update_progress(id, 250, "over").expect("update"), 100);

        let view = tracker.get(id).expect("tracked");
        assert_eq!(view.progress, 100);
        assert_eq!(view.current_step.as_deref(), Some("over"));
    }

    #[test]
    fn test_progress_only_accepted_while_processing() {
        let tracker = TaskStatusTracker::default();
        let id = tracker.create(new_task(None), None).expect("create");
        assert!(matches!(
            tracker.update_progress(id, 10, "navigate"),
            Err(EngineError::InvalidTransition { from: TaskStatus::Created, .. })
        ));
    }

    #[test]
    fn test_terminal_tasks_reject_every_mutation() {
        let tracker = TaskStatusTracker::default();
        let id = processing(&tracker);
        tracker.cancel(id).expect("cancel");

        let err = EngineError::Validation("bad".into());
        assert!(tracker.mark_queued(id).is_err());
        assert!(tracker.mark_processing(id, WorkerId(1), None).is_err());
        assert!(tracker.update_progress(id, 50, "x").is_err());
        assert!(tracker.fail(id, &err, false).is_err());
        assert!(tracker.cancel(id).is_err());

        let view = tracker.get(id).expect("tracked");
        assert_eq!(view.status, TaskStatus::Cancelled);
        assert!(view.error.is_none());
    }

    #[test]
    fn test_retryable_failure_requeues_and_counts() {
        let tracker = TaskStatusTracker::default();
        let id = processing(&tracker);
        let err = EngineError::from(DriverError::NavigationTimeout("slow".into()));

        assert_eq!(tracker.fail(id, &err, true).expect("requeue"), TaskStatus::Queued);
        let view = tracker.get(id).expect("tracked");
        assert_eq!(view.retry_count, 1);
        assert_eq!(view.status, TaskStatus::Queued);
        assert!(view.error.is_none(), "only FAILED tasks expose an error");

        tracker
            .mark_processing(id, WorkerId(2), None)
            .expect("second attempt");
        assert_eq!(tracker.fail(id, &err, false).expect("fail"), TaskStatus::Failed);
        let view = tracker.get(id).expect("tracked");
        assert_eq!(view.retry_count, 1);
        let error = view.error.expect("failed task exposes error");
        assert_eq!(error.kind, ErrorKind::NavigationTimeout);
        assert!(error.message.contains("slow"));
    }

    #[test]
    fn test_principal_quota_frees_on_terminal_state() {
        let tracker = TaskStatusTracker::default();
        let first = tracker.create(new_task(Some("alice")), Some(1)).expect("first");
        assert!(matches!(
            tracker.create(new_task(Some("alice")), Some(1)),
            Err(EngineError::QuotaExceeded { limit: 1, .. })
        ));
        assert!(tracker.create(new_task(Some("bob")), Some(1)).is_ok());

        tracker.cancel(first).expect("cancel");
        assert_eq!(tracker.inflight_for_principal("alice"), 0);
        assert!(tracker.create(new_task(Some("alice")), Some(1)).is_ok());
    }

    #[test]
    fn test_purge_only_removes_old_terminal_records() {
        let tracker = TaskStatusTracker::default();
        let live = tracker.create(new_task(None), None).expect("create");
        let done = tracker.create(new_task(None), None).expect("create");
        tracker.cancel(done).expect("cancel");

        assert_eq!(tracker.purge_finished(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.purge_finished(Duration::ZERO), 1);
        assert!(tracker.get(live).is_some());
        assert!(tracker.get(done).is_none());
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let tracker = TaskStatusTracker::default();
        assert!(matches!(
            tracker.cancel(TaskId::new()),
            Err(EngineError::TaskNotFound(_))
        ));
    }
}

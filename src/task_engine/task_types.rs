//! Task identity, options, the task state machine and read-only task views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::browser_pool::SessionId;
use crate::errors::{EngineError, ErrorKind};
use crate::page_extractor::schema::ParseResult;
use crate::utils::url_utils::Fingerprint;

/// Opaque, immutable task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TaskId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EngineError::Validation(format!("invalid task id '{s}': {e}")))
    }
}

/// Identifier of a worker loop inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// The closed set of parse options accepted at the boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseOptions {
    /// Wait for network idle / late DOM mutations after the load event
    pub wait_for_dynamic_content: bool,
    /// Collect `<meta>`-level page metadata during structure extraction
    pub include_metadata: bool,
    /// Bypass and overwrite any cached result for the same fingerprint
    pub force_refresh: bool,
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Apply an action to this state
    ///
    /// Returns the resulting state, or `None` when the state machine has no
    /// such edge. Progress updates and session attachment keep a task in
    /// PROCESSING and are accepted only there.
    #[must_use]
    pub const fn apply(self, action: TaskAction) -> Option<Self> {
        use TaskAction as A;
        match (self, action) {
            (Self::Created, A::Queue) => Some(Self::Queued),
            (Self::Created | Self::Queued, A::StartProcessing) => Some(Self::Processing),
            (Self::Processing, A::AttachSession | A::UpdateProgress) => Some(Self::Processing),
            (Self::Processing, A::Complete) => Some(Self::Completed),
            (Self::Processing, A::Fail) => Some(Self::Failed),
            (Self::Processing, A::Requeue) => Some(Self::Queued),
            (Self::Created | Self::Queued | Self::Processing, A::Cancel) => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutating operations on a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Queue,
    StartProcessing,
    AttachSession,
    UpdateProgress,
    Complete,
    Fail,
    Requeue,
    Cancel,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queue => "queue",
            Self::StartProcessing => "start processing",
            Self::AttachSession => "attach a session",
            Self::UpdateProgress => "update progress",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Requeue => "requeue",
            Self::Cancel => "cancel",
        })
    }
}

/// The five parse steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStep {
    Navigate,
    ExtractStructure,
    IdentifyInteractive,
    SemanticLabeling,
    CaptureArtifact,
}

impl ParseStep {
    pub const ALL: [Self; 5] = [
        Self::Navigate,
        Self::ExtractStructure,
        Self::IdentifyInteractive,
        Self::SemanticLabeling,
        Self::CaptureArtifact,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::ExtractStructure => "extract_structure",
            Self::IdentifyInteractive => "identify_interactive",
            Self::SemanticLabeling => "semantic_labeling",
            Self::CaptureArtifact => "capture_artifact",
        }
    }

    /// Progress reported before and after the step runs
    #[must_use]
    pub const fn progress_range(self) -> (u8, u8) {
        match self {
            Self::Navigate => (0, 20),
            Self::ExtractStructure => (20, 45),
            Self::IdentifyInteractive => (45, 65),
            Self::SemanticLabeling => (65, 80),
            Self::CaptureArtifact => (80, 95),
        }
    }
}

impl fmt::Display for ParseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error attached to a FAILED task: kind plus the verbatim message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for TaskError {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Reference to a finished parse result
///
/// The payload is shared with the cache entry it came from or was written to.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRef {
    pub fingerprint: Fingerprint,
    pub from_cache: bool,
    pub payload: Arc<ParseResult>,
}

/// Read-only snapshot of a task returned by `get`
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub url: String,
    pub options: ParseOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<WorkerId>,
    pub session_id: Option<SessionId>,
    pub retry_count: u32,
    /// Present only on FAILED tasks
    pub error: Option<TaskError>,
    pub result: Option<ResultRef>,
}

impl TaskView {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Cooperative cancellation flag shared between the scheduler and a worker
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A parse request as accepted by `TaskScheduler::submit_request`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
    #[serde(default)]
    pub options: ParseOptions,
    /// Already-authenticated caller identity, used for ownership and quota
    #[serde(default)]
    pub principal: Option<String>,
}

impl SubmitRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [TaskStatus; 6] = [
        TaskStatus::Created,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    const ACTIONS: [TaskAction; 8] = [
        TaskAction::Queue,
        TaskAction::StartProcessing,
        TaskAction::AttachSession,
        TaskAction::UpdateProgress,
        TaskAction::Complete,
        TaskAction::Fail,
        TaskAction::Requeue,
        TaskAction::Cancel,
    ];

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for state in STATES.iter().filter(|s| s.is_terminal()) {
            for action in ACTIONS {
                assert_eq!(state.apply(action), None, "{state} accepted {action}");
            }
        }
    }

    #[test]
    fn test_happy_path_and_requeue_edges() {
        assert_eq!(TaskStatus::Created.apply(TaskAction::Queue), Some(TaskStatus::Queued));
        assert_eq!(
            TaskStatus::Queued.apply(TaskAction::StartProcessing),
            Some(TaskStatus::Processing)
        );
        assert_eq!(
            TaskStatus::Processing.apply(TaskAction::Requeue),
            Some(TaskStatus::Queued)
        );
        assert_eq!(
            TaskStatus::Processing.apply(TaskAction::Complete),
            Some(TaskStatus::Completed)
        );
        assert_eq!(TaskStatus::Queued.apply(TaskAction::Complete), None);
        assert_eq!(TaskStatus::Queued.apply(TaskAction::UpdateProgress), None);
        assert_eq!(TaskStatus::Queued.apply(TaskAction::Queue), None);
    }

    #[test]
    fn test_cancel_from_every_live_state() {
        for state in STATES.iter().filter(|s| !s.is_terminal()) {
            assert_eq!(state.apply(TaskAction::Cancel), Some(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn test_step_progress_ranges_are_contiguous() {
        let mut last = 0;
        for step in ParseStep::ALL {
            let (start, end) = step.progress_range();
            assert_eq!(start, last);
            assert!(end > start);
            last = end;
        }
        assert!(last < 100);
    }

    #[test]
    fn test_task_id_round_trips_through_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().expect("display output parses");
        assert_eq!(id, parsed);
        assert!("nope".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_options_reject_unknown_fields() {
        let parsed: Result<ParseOptions, _> =
            serde_json::from_str(r#"{"include_metadata": true, "render_pdf": true}"#);
        assert!(parsed.is_err());

        let parsed: ParseOptions =
            serde_json::from_str(r#"{"include_metadata": true}"#).expect("known fields parse");
        assert!(parsed.include_metadata);
        assert!(!parsed.force_refresh);
    }
}

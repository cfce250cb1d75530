//! Task lifecycle, retry decisions and dispatch
//!
//! `scheduler` is the entry point. `tracker` owns task records and the
//! state machine defined in `task_types`, `worker` executes one attempt,
//! and `retry_policy` decides what happens after a failed one.

pub mod retry_policy;
pub mod scheduler;
pub mod step_timeout;
pub mod task_types;
pub mod tracker;
pub mod work_queue;
pub mod worker;

pub use retry_policy::{RetryDecision, RetryPolicy};
pub use scheduler::{SchedulerStats, ShutdownReport, TaskScheduler};
pub use task_types::{
    CancellationFlag, ParseOptions, ParseStep, ResultRef, SubmitRequest, TaskAction, TaskError,
    TaskId, TaskStatus, TaskView, WorkerId,
};
pub use tracker::{NewTask, TaskStatusTracker};
pub use work_queue::{WorkItem, WorkQueue};
pub use worker::{ParsingWorker, WorkerOutcome};

//! Per-task filtered event receivers

use tokio::sync::broadcast;

use super::types::TaskEvent;
use crate::task_engine::task_types::TaskId;

/// Receiver yielding only the events of one task
///
/// The stream ends after the task's terminal event or when the bus is
/// dropped. Lagged events are skipped with a warning.
pub struct TaskEventStream {
    receiver: broadcast::Receiver<TaskEvent>,
    task_id: TaskId,
    finished: bool,
}

impl TaskEventStream {
    pub(crate) fn for_task(receiver: broadcast::Receiver<TaskEvent>, task_id: TaskId) -> Self {
        Self {
            receiver,
            task_id,
            finished: false,
        }
    }

    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Receive the next event for this task
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.task_id() == self.task_id => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Event stream for task {} lagged, {skipped} events skipped",
                        self.task_id
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

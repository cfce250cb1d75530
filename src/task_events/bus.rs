//! Broadcast bus for task lifecycle events

use tokio::sync::broadcast;

use super::metrics::{EventBusMetrics, MetricsSnapshot};
use super::streaming::TaskEventStream;
use super::types::TaskEvent;
use crate::task_engine::task_types::TaskId;

/// Event bus for publishing and subscribing to task events
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is simply counted as unobserved. Slow subscribers lag and skip the
/// oldest events rather than holding back the engine.
#[derive(Debug)]
pub struct TaskEventBus {
    sender: broadcast::Sender<TaskEvent>,
    metrics: EventBusMetrics,
}

impl TaskEventBus {
    /// Create a new event bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            metrics: EventBusMetrics::new(),
        }
    }

    /// Publish an event to all current subscribers
    ///
    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: TaskEvent) -> usize {
        let delivered = self.sender.send(event).unwrap_or(0);
        self.metrics.record_publish(delivered);
        if delivered == 0 {
            log::trace!("Published task event with no active subscribers");
        }
        delivered
    }

    /// Subscribe to every task event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single task
    #[must_use]
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventStream {
        TaskEventStream::for_task(self.sender.subscribe(), task_id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        Self::new(crate::utils::constants::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

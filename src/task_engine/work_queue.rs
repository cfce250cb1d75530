//! Bounded FIFO of admitted tasks waiting for a worker

use tokio::sync::{Mutex, mpsc};

use super::task_types::{CancellationFlag, ParseOptions, TaskId};
use crate::errors::{EngineError, EngineResult};
use crate::utils::url_utils::Fingerprint;

/// One dispatchable unit of work
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task_id: TaskId,
    /// Normalized target URL
    pub url: String,
    pub fingerprint: Fingerprint,
    pub options: ParseOptions,
    pub cancel: CancellationFlag,
}

/// Reserved queue slot; dropping it gives the slot back
pub type QueueSlot<'a> = mpsc::Permit<'a, WorkItem>;

/// Many producers, many workers
///
/// Workers share the receiving end behind an async mutex; whoever holds
/// it waits for the next item, the rest wait for the lock in FIFO order.
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
    rx: Mutex<mpsc::Receiver<WorkItem>>,
    capacity: usize,
}

impl WorkQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Reserve a slot without waiting
    ///
    /// # Errors
    /// `QueueSaturated` when every slot is taken, `PoolClosed` once the
    /// queue has been closed.
    pub fn reserve(&self) -> EngineResult<QueueSlot<'_>> {
        self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => EngineError::QueueSaturated {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(()) => EngineError::PoolClosed,
        })
    }

    /// Put a retried item back, waiting for room if necessary
    ///
    /// Hands the item back if the queue has been closed.
    pub async fn requeue(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.tx.send(item).await.map_err(|e| e.0)
    }

    /// Next item in FIFO order; `None` once closed and drained
    pub async fn next(&self) -> Option<WorkItem> {
        self.rx.lock().await.recv().await
    }

    /// Close the queue and return whatever was still waiting
    pub async fn close(&self) -> Vec<WorkItem> {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut remaining = Vec::new();
        while let Ok(item) = rx.try_recv() {
            remaining.push(item);
        }
        remaining
    }

    /// Items currently waiting (reserved slots included)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::url_utils::{fingerprint, normalize_url};

    fn item(url: &str) -> WorkItem {
        let normalized = normalize_url(url).unwrap();
        WorkItem {
            task_id: TaskId::new(),
            fingerprint: fingerprint(&normalized, &ParseOptions::default()),
            url: normalized.to_string(),
            options: ParseOptions::default(),
            cancel: CancellationFlag::new(),
        }
    }

    #[tokio::test]
    async fn test_reserve_fails_fast_when_full() {
        let queue = WorkQueue::new(2);
        queue.reserve().unwrap().send(item("https://a.example"));
        queue.reserve().unwrap().send(item("https://b.example"));
        assert_eq!(queue.depth(), 2);

        let err = queue.reserve().unwrap_err();
        assert!(matches!(err, EngineError::QueueSaturated { capacity: 2 }));
    }

    #[tokio::test]
    async fn test_dropped_slot_is_returned() {
        let queue = WorkQueue::new(1);
        let slot = queue.reserve().unwrap();
        assert!(queue.reserve().is_err());
        drop(slot);
        assert!(queue.reserve().is_ok());
    }

    #[tokio::test]
    async fn test_items_come_out_in_order() {
        let queue = WorkQueue::new(4);
        let first = item("https://first.example");
        let second = item("https://second.example");
        let (a, b) = (first.task_id, second.task_id);
        queue.reserve().unwrap().send(first);
        queue.reserve().unwrap().send(second);

        assert_eq!(queue.next().await.unwrap().task_id, a);
        assert_eq!(queue.next().await.unwrap().task_id, b);
    }

    #[tokio::test]
    async fn test_close_returns_leftovers_and_rejects_new_work() {
        let queue = WorkQueue::new(4);
        queue.reserve().unwrap().send(item("https://left.example"));

        let leftovers = queue.close().await;
        assert_eq!(leftovers.len(), 1);
        assert!(matches!(queue.reserve(), Err(EngineError::PoolClosed)));
        assert!(queue.requeue(item("https://late.example")).await.is_err());
        assert!(queue.next().await.is_none());
    }
}

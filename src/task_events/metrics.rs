use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for event bus operations
#[derive(Debug, Default)]
pub struct EventBusMetrics {
    events_published: AtomicU64,
    events_unobserved: AtomicU64,
    peak_subscribers: AtomicUsize,
}

/// Point-in-time copy of [`EventBusMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    /// Events published while nobody was subscribed
    pub events_unobserved: u64,
    pub peak_subscribers: usize,
}

impl EventBusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self, subscribers: usize) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        if subscribers == 0 {
            self.events_unobserved.fetch_add(1, Ordering::Relaxed);
        }
        self.peak_subscribers.fetch_max(subscribers, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_unobserved: self.events_unobserved.load(Ordering::Relaxed),
            peak_subscribers: self.peak_subscribers.load(Ordering::Relaxed),
        }
    }
}

//! Event system for following task lifecycles
//!
//! The tracker publishes a `TaskEvent` for every accepted state change.
//! Consumers subscribe to the whole stream or to the events of one task.

pub mod bus;
pub mod metrics;
pub mod streaming;
pub mod types;

pub use bus::TaskEventBus;
pub use metrics::{EventBusMetrics, MetricsSnapshot};
pub use streaming::TaskEventStream;
pub use types::TaskEvent;

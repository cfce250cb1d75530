//! Background orchestration of webpage parsing
//!
//! Parse requests are answered from a fingerprint-addressed result cache or
//! admitted to a bounded queue, executed by a fixed set of workers against
//! a pool of headless-browser sessions, tracked through a strict task state
//! machine and retried according to an explicit policy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use webagent_orchestrator::{ChromiumDriver, EngineConfig, ParseOptions, TaskScheduler};
//!
//! # async fn run() -> Result<(), webagent_orchestrator::EngineError> {
//! let config = EngineConfig::builder().max_sessions(4).build()?;
//! let driver = Arc::new(ChromiumDriver::new(config.browser.clone()));
//! let scheduler = TaskScheduler::new(config, driver)?;
//!
//! let id = scheduler.submit("https://example.com", ParseOptions::default())?;
//! let mut events = scheduler.subscribe_task(id);
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod browser_pool;
pub mod browser_setup;
pub mod config;
pub mod errors;
pub mod page_extractor;
pub mod result_cache;
pub mod task_engine;
pub mod task_events;
pub mod utils;

pub use browser_pool::{
    AutomationContext, BrowserSession, BrowserSessionPool, ChromiumDriver, NavigateOptions,
    PoolShutdownReport, PoolStats, ReleaseOutcome, SessionDriver, SessionHealth, SessionId,
    SessionLease,
};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use errors::{DriverError, EngineError, EngineResult, ErrorKind};
pub use page_extractor::schema::*;
pub use result_cache::{CacheStats, ResultCache};
pub use task_engine::{
    ParseOptions, ParseStep, RetryDecision, RetryPolicy, SchedulerStats, ShutdownReport,
    SubmitRequest, TaskError, TaskId, TaskScheduler, TaskStatus, TaskStatusTracker, TaskView,
};
pub use task_events::{TaskEvent, TaskEventBus, TaskEventStream};
pub use utils::url_utils::{Fingerprint, fingerprint, normalize_url};

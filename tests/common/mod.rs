//! Shared helpers for the integration tests
//!
//! `FakeDriver` stands in for Chromium: every context answers the parse
//! steps with canned data, and per-URL scripts make navigation fail, stall
//! or block until released.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use webagent_orchestrator::config::StepTimeouts;
use webagent_orchestrator::{
    AutomationContext, CapturedArtifact, DriverError, EngineConfig, HeadingElement,
    InteractiveElement, NavigateOptions, NavigationInfo, PageMetadata, PageStructure,
    SessionDriver, SessionId, TaskId, TaskScheduler, TaskView,
};

/// How navigation to a scripted URL behaves
#[derive(Clone)]
pub enum Behavior {
    /// Fail the first `times` navigations with `error`, then succeed
    FailTimes { times: usize, error: DriverError },
    /// Fail every navigation with `error`
    AlwaysFail(DriverError),
    /// Succeed after sleeping
    Delay(Duration),
    /// Never finish
    Hang,
    /// Wait for a permit from the gate, then succeed
    Gate(Arc<Semaphore>),
}

#[derive(Default)]
struct FakeState {
    scripts: Mutex<HashMap<String, Behavior>>,
    /// Navigations attempted per script key
    attempts: Mutex<HashMap<String, usize>>,
    launches: AtomicUsize,
    closes: AtomicUsize,
    resets: AtomicUsize,
    /// Contexts between navigate and reset/close
    busy: AtomicUsize,
    max_busy: AtomicUsize,
    /// Sessions currently driving a page, by id
    driving: Mutex<Vec<SessionId>>,
    exclusivity_violations: AtomicUsize,
    fail_launch: AtomicBool,
    fail_health_check: AtomicBool,
    hang_memory_estimate: AtomicBool,
    hang_reset: AtomicBool,
    hang_close: AtomicBool,
}

/// Scriptable `SessionDriver`; clones share state
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `behavior` to every URL containing `key`
    pub fn script(&self, key: &str, behavior: Behavior) {
        self.state.scripts.lock().insert(key.to_string(), behavior);
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_health_checks(&self, fail: bool) {
        self.state.fail_health_check.store(fail, Ordering::SeqCst);
    }

    /// Make `memory_usage` never answer
    pub fn hang_memory_estimates(&self, hang: bool) {
        self.state.hang_memory_estimate.store(hang, Ordering::SeqCst);
    }

    /// Make `reset` never finish; `resets()` still counts the call
    pub fn hang_resets(&self, hang: bool) {
        self.state.hang_reset.store(hang, Ordering::SeqCst);
    }

    /// Make `close` never finish; `closes()` still counts the call
    pub fn hang_closes(&self, hang: bool) {
        self.state.hang_close.store(hang, Ordering::SeqCst);
    }

    /// Navigations attempted against URLs matching `key`
    pub fn attempts(&self, key: &str) -> usize {
        self.state.attempts.lock().get(key).copied().unwrap_or(0)
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn max_busy(&self) -> usize {
        self.state.max_busy.load(Ordering::SeqCst)
    }

    pub fn exclusivity_violations(&self) -> usize {
        self.state.exclusivity_violations.load(Ordering::SeqCst)
    }

    pub fn as_driver(&self) -> Arc<dyn SessionDriver> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn launch(&self, id: SessionId) -> Result<Box<dyn AutomationContext>, DriverError> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(DriverError::SessionCrashed(format!("{id} failed to start")));
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            id,
            state: Arc::clone(&self.state),
            current_url: None,
            busy: false,
        }))
    }
}

pub struct FakeContext {
    id: SessionId,
    state: Arc<FakeState>,
    current_url: Option<String>,
    busy: bool,
}

impl FakeContext {
    fn start_driving(&mut self) {
        if self.busy {
            return;
        }
        self.busy = true;
        let now = self.state.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_busy.fetch_max(now, Ordering::SeqCst);

        let mut driving = self.state.driving.lock();
        if driving.contains(&self.id) {
            self.state.exclusivity_violations.fetch_add(1, Ordering::SeqCst);
        }
        driving.push(self.id);
    }

    fn stop_driving(&mut self) {
        if !self.busy {
            return;
        }
        self.busy = false;
        self.state.busy.fetch_sub(1, Ordering::SeqCst);
        let mut driving = self.state.driving.lock();
        if let Some(pos) = driving.iter().position(|id| *id == self.id) {
            driving.remove(pos);
        }
    }

    fn behavior_for(&self, url: &str) -> Option<(String, Behavior)> {
        self.state
            .scripts
            .lock()
            .iter()
            .find(|(key, _)| url.contains(key.as_str()))
            .map(|(key, behavior)| (key.clone(), behavior.clone()))
    }
}

#[async_trait]
impl AutomationContext for FakeContext {
    async fn navigate(
        &mut self,
        url: &str,
        _options: NavigateOptions,
    ) -> Result<NavigationInfo, DriverError> {
        self.start_driving();

        if let Some((key, behavior)) = self.behavior_for(url) {
            let attempt = {
                let mut attempts = self.state.attempts.lock();
                let count = attempts.entry(key).or_insert(0);
                *count += 1;
                *count
            };

            match behavior {
                Behavior::FailTimes { times, error } if attempt <= times => return Err(error),
                Behavior::FailTimes { .. } => {}
                Behavior::AlwaysFail(error) => return Err(error),
                Behavior::Delay(delay) => tokio::time::sleep(delay).await,
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Gate(gate) => {
                    let permit = gate
                        .acquire()
                        .await
                        .map_err(|_| DriverError::Other("gate closed".to_string()))?;
                    permit.forget();
                }
            }
        }

        self.current_url = Some(url.to_string());
        Ok(NavigationInfo {
            final_url: url.to_string(),
            status_code: Some(200),
        })
    }

    async fn extract_structure(&mut self) -> Result<PageStructure, DriverError> {
        Ok(PageStructure {
            title: Some("Fake page".to_string()),
            language: Some("en".to_string()),
            headings: vec![HeadingElement {
                level: 1,
                text: "Welcome".to_string(),
                id: None,
                ordinal: vec![1],
            }],
            link_count: 2,
            text_length: 128,
            ..PageStructure::default()
        })
    }

    async fn extract_metadata(&mut self) -> Result<PageMetadata, DriverError> {
        Ok(PageMetadata {
            description: Some("A page served by the fake driver".to_string()),
            ..PageMetadata::default()
        })
    }

    async fn interactive_elements(&mut self) -> Result<Vec<InteractiveElement>, DriverError> {
        let base = self.current_url.clone().unwrap_or_default();
        Ok(vec![
            InteractiveElement {
                element_type: "a".to_string(),
                selector: "nav > a:nth-of-type(1)".to_string(),
                text: Some("Docs".to_string()),
                url: Some(format!("{}/docs", base.trim_end_matches('/'))),
                attributes: HashMap::new(),
            },
            InteractiveElement {
                element_type: "button".to_string(),
                selector: "#submit".to_string(),
                text: Some("Submit".to_string()),
                url: None,
                attributes: HashMap::from([("type".to_string(), "submit".to_string())]),
            },
        ])
    }

    async fn capture_artifact(&mut self) -> Result<CapturedArtifact, DriverError> {
        Ok(CapturedArtifact::png(b"\x89PNG fake"))
    }

    async fn memory_usage(&mut self) -> Option<u64> {
        if self.state.hang_memory_estimate.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Some(16 * 1024 * 1024)
    }

    async fn health_check(&mut self) -> Result<(), DriverError> {
        if self.state.fail_health_check.load(Ordering::SeqCst) {
            Err(DriverError::SessionCrashed("target closed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn reset(&mut self) -> Result<(), DriverError> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_reset.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.stop_driving();
        self.current_url = None;
        Ok(())
    }

    async fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.stop_driving();
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.stop_driving();
    }
}

/// Small, fast configuration for engine tests
pub fn test_config(max_sessions: usize, queue_capacity: usize) -> EngineConfig {
    let mut config = EngineConfig::builder()
        .max_sessions(max_sessions)
        .min_warm_sessions(0)
        .concurrency(max_sessions)
        .queue_capacity(queue_capacity)
        .acquire_timeout_ms(2_000)
        .max_attempts(3)
        .retry_backoff_ms(10, 40, 0)
        .step_timeouts(StepTimeouts::uniform(2_000))
        .build()
        .expect("valid test config");
    config.cache.cleanup_interval_secs = None;
    config
}

pub fn scheduler(driver: &FakeDriver, config: EngineConfig) -> TaskScheduler {
    TaskScheduler::new(config, driver.as_driver()).expect("scheduler starts")
}

/// Poll until the task reaches a terminal state
pub async fn wait_terminal(scheduler: &TaskScheduler, id: TaskId) -> TaskView {
    wait_until(scheduler, id, |view| view.is_terminal()).await
}

/// Poll until `predicate` holds for the task's view
pub async fn wait_until<F>(scheduler: &TaskScheduler, id: TaskId, predicate: F) -> TaskView
where
    F: Fn(&TaskView) -> bool,
{
    let poll = async {
        loop {
            if let Some(view) = scheduler.get(id)
                && predicate(&view)
            {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("task did not reach the expected state in time")
}

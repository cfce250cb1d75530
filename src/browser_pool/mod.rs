//! Bounded pool of browser automation sessions
//!
//! Sessions are created lazily up to `max_sessions`, leased exclusively to
//! one task at a time and retired once they exceed their page or memory
//! ceiling, report unhealthy, or sit idle past the idle timeout. Waiting
//! acquirers are served strictly in arrival order.
//!
//! The pool state lives behind a single synchronous lock that is only held
//! for O(1) bookkeeping, never across a driver call.

pub mod driver;
pub mod session;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use driver::{AutomationContext, ChromiumDriver, NavigateOptions, SessionDriver};
pub use session::{BrowserSession, ReleaseOutcome, RetirementReason, SessionHealth, SessionId};

use crate::config::PoolConfig;
use crate::errors::{EngineError, EngineResult};
use crate::task_engine::task_types::TaskId;
use session::PooledSession;

/// What a queued acquirer is handed
enum Grant {
    /// A ready session released by another holder
    Session(PooledSession),
    /// Capacity freed by a retirement; the receiver launches a new session
    Slot,
}

struct Waiter {
    ticket: u64,
    holder: TaskId,
    tx: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<PooledSession>,
    leased: HashMap<SessionId, BrowserSession>,
    /// Idle + leased + launching + in hand-over; never exceeds `max_sessions`
    total: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

/// Point-in-time view of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_sessions: usize,
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub waiting: usize,
    pub sessions_created: u64,
    pub sessions_retired: u64,
}

/// Outcome of `BrowserSessionPool::shutdown`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolShutdownReport {
    pub idle_closed: usize,
    /// Leases returned within the drain timeout
    pub drained: usize,
    /// Leases still out at the deadline; closed when their holders let go
    pub abandoned: usize,
}

pub struct BrowserSessionPool {
    config: PoolConfig,
    driver: Arc<dyn SessionDriver>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    closed: AtomicBool,
    lease_returned: Notify,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    sessions_created: AtomicU64,
    sessions_retired: AtomicU64,
}

impl BrowserSessionPool {
    /// Create an empty pool; no session is launched until `acquire` or `warm_up`
    pub fn new(config: PoolConfig, driver: Arc<dyn SessionDriver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            driver,
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            lease_returned: Notify::new(),
            maintenance: Mutex::new(None),
            sessions_created: AtomicU64::new(0),
            sessions_retired: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lease a session exclusively to `holder`
    ///
    /// Prefers an idle session, launches a new one while under capacity, and
    /// otherwise queues behind earlier callers until a session or slot frees
    /// up or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// `PoolTimeout` when nothing frees up in time, `PoolClosed` once
    /// shutdown has begun, `ResourceExhausted` if launching a session fails.
    pub async fn acquire(self: &Arc<Self>, holder: TaskId, timeout: Duration) -> EngineResult<SessionLease> {
        let deadline = Instant::now() + timeout;

        loop {
            enum Next {
                Ready(PooledSession),
                Launch,
                Wait(oneshot::Receiver<Grant>, u64),
            }

            let next = {
                let mut state = self.state.lock();
                if self.is_closed() {
                    return Err(EngineError::PoolClosed);
                }
                if let Some(session) = state.idle.pop_front() {
                    Next::Ready(session)
                } else if state.total < self.config.max_sessions {
                    state.total += 1;
                    Next::Launch
                } else {
                    let (tx, rx) = oneshot::channel();
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    state.waiters.push_back(Waiter { ticket, holder, tx });
                    debug!(
                        task_id = %holder,
                        waiting = state.waiters.len(),
                        "Pool at capacity, queueing acquire"
                    );
                    Next::Wait(rx, ticket)
                }
            };

            let grant = match next {
                Next::Ready(session) => Grant::Session(session),
                Next::Launch => Grant::Slot,
                Next::Wait(mut rx, ticket) => {
                    // Leaves the queue however this wait ends
                    let _queued = QueuedWaiter { pool: self, ticket };
                    match tokio::time::timeout_at(deadline, &mut rx).await {
                        Ok(Ok(grant)) => grant,
                        Ok(Err(_)) => return Err(EngineError::PoolClosed),
                        Err(_) => {
                            // Close first so a concurrent grant either lands here
                            // or bounces back to the granter, never lost.
                            rx.close();
                            match rx.try_recv() {
                                Ok(grant) => grant,
                                Err(_) => {
                                    debug!(task_id = %holder, "Acquire timed out after {timeout:?}");
                                    return Err(EngineError::PoolTimeout { waited: timeout });
                                }
                            }
                        }
                    }
                }
            };

            // Owns one unit of `total` until the session is leased
            let reservation = SlotReservation::new(self);

            match grant {
                Grant::Session(mut session) => {
                    let health = tokio::time::timeout(
                        self.config.session_call_timeout(),
                        session.context.health_check(),
                    )
                    .await;
                    match health {
                        Ok(Ok(())) => return Ok(reservation.lease(session, holder)),
                        Ok(Err(e)) => {
                            warn!(session = %session.id(), "Idle session failed health check: {e}");
                        }
                        Err(_) => {
                            warn!(session = %session.id(), "Idle session health check timed out");
                        }
                    }
                    reservation.disarm();
                    self.retire(session, RetirementReason::FailedHealthCheck).await;
                }
                Grant::Slot => match self.launch_session().await {
                    Ok(session) => return Ok(reservation.lease(session, holder)),
                    Err(e) => {
                        drop(reservation);
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Return a leased session
    ///
    /// A healthy session under its ceilings is reset and handed to the
    /// longest-waiting acquirer, or parked idle. Anything else is retired,
    /// and a replacement is launched if the pool falls below its warm count.
    ///
    /// The session stays inside the lease until the reset finishes, so a
    /// caller dropped mid-release still hands it to the abandon path.
    pub async fn release(self: &Arc<Self>, mut lease: SessionLease, outcome: ReleaseOutcome) {
        let Some(session) = lease.session.as_mut() else {
            return;
        };

        session.info.page_count = session.info.page_count.saturating_add(outcome.pages_served);
        if let Some(bytes) = outcome.memory_estimate_bytes {
            session.info.memory_estimate_bytes = bytes;
        }
        session.info.health = outcome.health;
        session.info.last_used_at = chrono::Utc::now();
        session.last_used = Instant::now();

        let retirement = match self.retirement_reason(&session.info) {
            Some(reason) => Some(reason),
            None => {
                let budget = self.config.session_call_timeout();
                match tokio::time::timeout(budget, session.context.reset()).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => {
                        warn!(session = %session.id(), "Failed to reset session state: {e}");
                        Some(RetirementReason::ResetFailed)
                    }
                    Err(_) => {
                        warn!(session = %session.id(), "Session reset timed out after {budget:?}");
                        Some(RetirementReason::ResetFailed)
                    }
                }
            }
        };

        let Some(mut session) = lease.session.take() else {
            return;
        };
        if let Some(reason) = retirement {
            self.retire(session, reason).await;
            return;
        }

        session.info.lease_holder = None;
        if let Some(session) = self.hand_back(session) {
            self.retire(session, RetirementReason::Shutdown).await;
        }
    }

    /// Launch sessions until the pool holds `min_warm_sessions`
    ///
    /// Returns the number of sessions created.
    pub async fn warm_up(self: &Arc<Self>) -> usize {
        let mut created = 0;

        loop {
            {
                let mut state = self.state.lock();
                if self.is_closed() || state.total >= self.config.min_warm_sessions {
                    break;
                }
                state.total += 1;
            }

            match self.launch_session().await {
                Ok(session) => {
                    created += 1;
                    if let Some(session) = self.hand_back(session) {
                        self.retire(session, RetirementReason::Shutdown).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to launch warm session: {e}");
                    self.free_slot();
                    break;
                }
            }
        }

        if created > 0 {
            debug!("Warmed {created} session(s)");
        }
        created
    }

    /// Start the background loop that reaps idle sessions and keeps the
    /// warm minimum
    pub fn start_maintenance(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let period = self.config.maintenance_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            while !pool.is_closed() {
                interval.tick().await;
                let reaped = pool.reap_idle().await;
                if reaped > 0 {
                    debug!("Reaped {reaped} idle session(s)");
                }
                pool.warm_up().await;
            }

            debug!("Pool maintenance loop exiting");
        });

        if let Some(previous) = self.maintenance.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the maintenance loop, if running
    pub fn stop_maintenance(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }

    /// Retire idle sessions unused for longer than `idle_timeout`, oldest
    /// first, without dropping below the warm minimum
    pub async fn reap_idle(self: &Arc<Self>) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let expired: Vec<PooledSession> = {
            let mut state = self.state.lock();
            let mut expired = Vec::new();
            let mut remaining = state.total;

            while remaining > self.config.min_warm_sessions {
                match state.idle.front() {
                    Some(session) if session.last_used.elapsed() > idle_timeout => {
                        if let Some(session) = state.idle.pop_front() {
                            expired.push(session);
                            remaining -= 1;
                        }
                    }
                    _ => break,
                }
            }
            expired
        };

        let count = expired.len();
        for session in expired {
            self.retire(session, RetirementReason::IdleTimeout).await;
        }
        count
    }

    /// Stop admitting acquirers, wait up to `drain_timeout` for outstanding
    /// leases, and close every session the pool still holds
    ///
    /// Queued acquirers fail with `PoolClosed`. Leases still out at the
    /// deadline are closed as soon as they are released or dropped.
    pub async fn shutdown(self: &Arc<Self>, drain_timeout: Duration) -> PoolShutdownReport {
        if self.closed.swap(true, Ordering::AcqRel) {
            return PoolShutdownReport::default();
        }
        info!("Shutting down browser session pool");

        self.stop_maintenance();

        let (idle, waiters, leased_at_start) = {
            let mut state = self.state.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters, state.leased.len())
        };

        // Dropping the senders wakes every queued acquirer with PoolClosed
        for waiter in waiters {
            debug!(task_id = %waiter.holder, "Rejecting queued acquire on shutdown");
            drop(waiter.tx);
        }

        let idle_closed = idle.len();
        for session in idle {
            self.retire(session, RetirementReason::Shutdown).await;
        }

        let deadline = Instant::now() + drain_timeout;
        let abandoned = loop {
            let notified = self.lease_returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outstanding = self.state.lock().leased.len();
            if outstanding == 0 {
                break 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let outstanding = self.state.lock().leased.len();
                if outstanding > 0 {
                    warn!("{outstanding} lease(s) still out after {drain_timeout:?} drain timeout");
                }
                break outstanding;
            }
        };

        let report = PoolShutdownReport {
            idle_closed,
            drained: leased_at_start.saturating_sub(abandoned),
            abandoned,
        };
        info!(
            idle_closed = report.idle_closed,
            drained = report.drained,
            abandoned = report.abandoned,
            "Browser session pool shut down"
        );
        report
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            max_sessions: self.config.max_sessions,
            total: state.total,
            idle: state.idle.len(),
            leased: state.leased.len(),
            waiting: state.waiters.len(),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_retired: self.sessions_retired.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of every idle and leased session
    pub fn sessions(&self) -> Vec<BrowserSession> {
        let state = self.state.lock();
        let mut sessions: Vec<_> = state
            .idle
            .iter()
            .map(|s| s.info.clone())
            .chain(state.leased.values().cloned())
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    async fn launch_session(&self) -> EngineResult<PooledSession> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.driver.launch(id).await {
            Ok(context) => {
                self.sessions_created.fetch_add(1, Ordering::Relaxed);
                debug!(session = %id, "Launched browser session");
                Ok(PooledSession::new(id, context))
            }
            Err(e) => {
                warn!(session = %id, "Failed to launch browser session: {e}");
                Err(EngineError::ResourceExhausted(format!(
                    "failed to launch browser session: {e}"
                )))
            }
        }
    }

    fn retirement_reason(&self, info: &BrowserSession) -> Option<RetirementReason> {
        if self.is_closed() {
            Some(RetirementReason::Shutdown)
        } else if info.health != SessionHealth::Healthy {
            Some(RetirementReason::Unhealthy)
        } else if info.page_count >= self.config.max_pages_per_session {
            Some(RetirementReason::PageLimit)
        } else if info.memory_estimate_bytes >= self.config.max_session_memory_bytes {
            Some(RetirementReason::MemoryLimit)
        } else {
            None
        }
    }

    /// Give a ready session to the oldest live waiter, or park it idle
    ///
    /// Returns the session when the pool has closed in the meantime.
    fn hand_back(&self, mut session: PooledSession) -> Option<PooledSession> {
        let id = session.id();
        {
            let mut state = self.state.lock();
            state.leased.remove(&id);

            if self.is_closed() {
                return Some(session);
            }

            loop {
                let Some(waiter) = state.waiters.pop_front() else {
                    state.idle.push_back(session);
                    debug!(session = %id, idle = state.idle.len(), "Session returned to idle set");
                    break;
                };
                match waiter.tx.send(Grant::Session(session)) {
                    Ok(()) => {
                        debug!(session = %id, task_id = %waiter.holder, "Session handed to waiting acquirer");
                        break;
                    }
                    // The waiter gave up; try the next one
                    Err(Grant::Session(returned)) => session = returned,
                    Err(Grant::Slot) => unreachable!("a session grant bounces back as a session"),
                }
            }
        }
        self.lease_returned.notify_waiters();
        None
    }

    /// Release one unit of capacity to the oldest live waiter, or shrink
    fn free_slot(&self) {
        let mut state = self.state.lock();
        if !self.is_closed() {
            while let Some(waiter) = state.waiters.pop_front() {
                if waiter.tx.send(Grant::Slot).is_ok() {
                    return;
                }
            }
        }
        state.total = state.total.saturating_sub(1);
    }

    async fn retire(self: &Arc<Self>, session: PooledSession, reason: RetirementReason) {
        let id = session.id();
        info!(
            session = %id,
            pages = session.info.page_count,
            memory_bytes = session.info.memory_estimate_bytes,
            "Retiring session: {reason}"
        );

        let mut retiring = Retiring::new(self, session);
        if let Some(session) = retiring.session.as_mut() {
            let budget = self.config.session_call_timeout();
            if tokio::time::timeout(budget, session.context.close()).await.is_err() {
                warn!(session = %id, "Session close timed out after {budget:?}, dropping context");
            }
        }
        drop(retiring);
        self.replenish();
    }

    /// Lease dropped without `release`: close the context in the background
    /// when a runtime is available, otherwise drop it in place
    fn abandon(self: &Arc<Self>, session: PooledSession) {
        warn!(session = %session.id(), "Session lease dropped without release");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                handle.spawn(async move {
                    pool.retire(session, RetirementReason::Abandoned).await;
                });
            }
            Err(_) => drop(Retiring::new(self, session)),
        }
    }

    /// Forget a retired session and give its capacity back
    fn finish_retirement(&self, id: SessionId) {
        self.state.lock().leased.remove(&id);
        self.sessions_retired.fetch_add(1, Ordering::Relaxed);
        self.free_slot();
        self.lease_returned.notify_waiters();
    }

    fn replenish(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let below_warm = self.state.lock().total < self.config.min_warm_sessions;
        if below_warm {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.warm_up().await;
            });
        }
    }
}

/// One unit of pool capacity held by an in-progress `acquire`
///
/// Dropped without being turned into a lease (failed launch, cancelled
/// acquire) it gives the capacity back.
struct SlotReservation<'a> {
    pool: &'a Arc<BrowserSessionPool>,
    armed: bool,
}

impl<'a> SlotReservation<'a> {
    const fn new(pool: &'a Arc<BrowserSessionPool>) -> Self {
        Self { pool, armed: true }
    }

    fn lease(mut self, mut session: PooledSession, holder: TaskId) -> SessionLease {
        self.armed = false;
        session.info.lease_holder = Some(holder);
        session.info.last_used_at = chrono::Utc::now();
        session.last_used = Instant::now();

        let id = session.id();
        self.pool.state.lock().leased.insert(id, session.info.clone());
        debug!(session = %id, task_id = %holder, "Session leased");

        SessionLease {
            pool: Arc::clone(self.pool),
            id,
            holder,
            session: Some(session),
        }
    }

    /// The capacity is accounted for elsewhere (retirement)
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.free_slot();
        }
    }
}

/// Queue entry of a waiting `acquire`; removed when the wait ends for any
/// reason, so `PoolStats::waiting` only counts live acquirers
struct QueuedWaiter<'a> {
    pool: &'a BrowserSessionPool,
    ticket: u64,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.pool.state.lock().waiters.retain(|w| w.ticket != ticket);
    }
}

/// A session on its way out of the pool
///
/// The pool's bookkeeping is settled when this drops, after the context is
/// closed or, if the retiring task is aborted, with the context dropped
/// unclosed.
struct Retiring<'a> {
    pool: &'a BrowserSessionPool,
    id: SessionId,
    session: Option<PooledSession>,
}

impl<'a> Retiring<'a> {
    fn new(pool: &'a BrowserSessionPool, session: PooledSession) -> Self {
        Self {
            pool,
            id: session.id(),
            session: Some(session),
        }
    }
}

impl Drop for Retiring<'_> {
    fn drop(&mut self) {
        drop(self.session.take());
        self.pool.finish_retirement(self.id);
    }
}

/// Exclusive lease on a pooled session
///
/// Return it with `BrowserSessionPool::release`. A lease dropped without
/// release is treated as abandoned and its session is retired.
pub struct SessionLease {
    pool: Arc<BrowserSessionPool>,
    id: SessionId,
    holder: TaskId,
    session: Option<PooledSession>,
}

impl SessionLease {
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn holder(&self) -> TaskId {
        self.holder
    }

    /// Bookkeeping as of the moment the lease was granted
    pub fn info(&self) -> Option<&BrowserSession> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn context(&mut self) -> &mut (dyn AutomationContext + 'static) {
        match self.session.as_mut() {
            Some(session) => session.context.as_mut(),
            None => unreachable!("session lease used after release"),
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.id)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.abandon(session);
        }
    }
}

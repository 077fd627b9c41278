//! Session pool implementation.
//!
//! A pool holds sessions for one database on one transport. Idle sessions
//! are reused most-recently-used first; callers that find the pool at
//! capacity queue in arrival order and are handed the next returned session
//! or free creation slot.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use spanner_protocol::{
    CallSettings, CancellationToken, Clock, Code, DatabaseName, RpcError, SessionName, SpannerRpc,
    TokioClock, TransactionMode,
};
use tokio::sync::{Notify, oneshot, watch};
use tokio::time::Instant;

use crate::config::SessionPoolOptions;
use crate::error::PoolError;
use crate::retry::Backoff;
use crate::session::{PooledSession, Session};

/// A pool of sessions for a single database.
///
/// Handles are cheap to clone and share one pool.
///
/// # Example
///
/// ```rust,ignore
/// use spanner_pool::{SessionPool, SessionPoolOptions};
/// use spanner_protocol::{CancellationToken, TransactionMode};
///
/// let pool = SessionPool::builder(database, rpc)
///     .options(SessionPoolOptions::new().min_sessions(10).max_sessions(50))
///     .build()
///     .await?;
///
/// let cancel = CancellationToken::new();
/// pool.when_ready(&cancel).await?;
///
/// let session = pool.acquire(TransactionMode::None, &cancel).await?;
/// // Use session...
/// // Session automatically returned to the pool on drop
/// ```
#[derive(Debug, Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub(crate) database: DatabaseName,
    pub(crate) options: SessionPoolOptions,
    pub(crate) rpc: Arc<dyn SpannerRpc>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<PoolState>,
    /// Signalled whenever a session or slot is given back.
    pub(crate) changed: Notify,
    readiness: watch::Sender<Readiness>,
    /// Cancelled at shutdown; stops maintenance and warm-up.
    pub(crate) background: CancellationToken,
    created_at: Instant,
    pub(crate) metrics: Mutex<PoolMetricsInner>,
}

impl fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolInner")
            .field("database", &self.database)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready,
    Failed(RpcError),
}

/// What a queued caller receives.
#[derive(Debug)]
pub(crate) enum Grant {
    /// An existing session, already counted as checked out.
    Session(Session),
    /// Permission to create a session, already counted as reserved.
    Slot,
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Ordered by last use; the back is the most recently used.
    pub(crate) idle: VecDeque<Session>,
    pub(crate) checked_out: hashbrown::HashSet<SessionName>,
    /// Capacity held for sessions being created or health-checked.
    pub(crate) reserved: usize,
    waiters: VecDeque<oneshot::Sender<Grant>>,
    /// Sessions to delete on the server.
    pub(crate) doomed: Vec<SessionName>,
    pub(crate) shut_down: bool,
}

impl PoolState {
    pub(crate) fn total(&self) -> usize {
        self.idle.len() + self.checked_out.len() + self.reserved
    }

    /// Hand `session` to the longest-waiting caller, or park it as idle.
    pub(crate) fn offer(&mut self, mut session: Session) {
        if self.shut_down {
            self.doomed.push(session.name);
            return;
        }

        let name = session.name.clone();
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Grant::Session(session)) {
                Err(Grant::Session(returned)) => session = returned,
                _ => {
                    self.checked_out.insert(name);
                    return;
                }
            }
        }

        let pos = self
            .idle
            .partition_point(|s| s.last_used <= session.last_used);
        self.idle.insert(pos, session);
    }

    /// Give creation slots to queued callers while capacity allows.
    pub(crate) fn grant_slots(&mut self, max: usize) {
        if self.shut_down {
            return;
        }
        while self.total() < max {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.reserved += 1;
            if waiter.send(Grant::Slot).is_err() {
                self.reserved -= 1;
            }
        }
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    pub(crate) sessions_created: u64,
    pub(crate) sessions_deleted: u64,
    pub(crate) sessions_evicted: u64,
    pub(crate) acquisitions_successful: u64,
    pub(crate) acquisitions_failed: u64,
    pub(crate) health_checks_performed: u64,
    pub(crate) health_checks_failed: u64,
}

/// A queued acquisition. Dropping it before a grant is consumed hands any
/// grant that raced in back to the pool.
struct PendingGrant {
    rx: oneshot::Receiver<Grant>,
    pool: Arc<PoolInner>,
    settled: bool,
}

impl PendingGrant {
    async fn wait(mut self, cancel: &CancellationToken) -> Result<Grant, PoolError> {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            grant = &mut self.rx => Some(grant),
        };
        match received {
            None => Err(PoolError::Cancelled),
            Some(grant) => {
                self.settled = true;
                grant.map_err(|_| self.pool.shutdown_error())
            }
        }
    }
}

impl Drop for PendingGrant {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        match self.rx.try_recv() {
            Ok(grant) => self.pool.return_grant(grant),
            Err(_) => self.pool.state.lock().waiters.retain(|w| !w.is_closed()),
        }
    }
}

/// A creation slot held by an acquisition. Released if the acquisition is
/// dropped mid-creation.
struct SlotGuard<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

impl PoolInner {
    pub(crate) fn max(&self) -> usize {
        self.options.max_sessions as usize
    }

    pub(crate) fn shutdown_error(&self) -> PoolError {
        PoolError::Shutdown(self.database.to_string())
    }

    async fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Result<Session, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let pending = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(self.shutdown_error());
            }
            if let Some(session) = state.idle.pop_back() {
                state.checked_out.insert(session.name.clone());
                return Ok(session);
            }
            if state.total() < self.max() {
                state.reserved += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(PendingGrant {
                    rx,
                    pool: Arc::clone(self),
                    settled: false,
                })
            }
        };

        let grant = match pending {
            None => Grant::Slot,
            Some(pending) => {
                tracing::trace!(database = %self.database, "pool at capacity, waiting for a session");
                pending.wait(cancel).await?
            }
        };

        match grant {
            Grant::Session(session) => Ok(session),
            Grant::Slot => self.create_in_slot(cancel).await,
        }
    }

    /// Create a session for an acquisition that holds a reserved slot.
    async fn create_in_slot(&self, cancel: &CancellationToken) -> Result<Session, PoolError> {
        let mut slot = SlotGuard {
            pool: self,
            armed: true,
        };

        let rpc = Arc::clone(&self.rpc);
        let database = self.database.clone();
        let created = self
            .with_creation_retry(cancel, move |call| {
                let rpc = Arc::clone(&rpc);
                let database = database.clone();
                async move { rpc.create_session(&database, &call).await }
            })
            .await;
        slot.armed = false;

        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
        match created {
            Ok(info) => {
                self.metrics.lock().sessions_created += 1;
                let session = Session::new(info.name, self.clock.now());
                if state.shut_down {
                    state.doomed.push(session.name);
                    drop(state);
                    self.changed.notify_waiters();
                    return Err(self.shutdown_error());
                }
                tracing::debug!(database = %self.database, session = %session.name, "session created");
                state.checked_out.insert(session.name.clone());
                self.update_readiness(&state);
                Ok(session)
            }
            Err(error) => {
                state.grant_slots(self.max());
                drop(state);
                self.changed.notify_waiters();
                tracing::warn!(database = %self.database, error = %error, "failed to create session");
                Err(PoolError::from_call(error))
            }
        }
    }

    /// Run a session-creation call, retrying transient failures.
    async fn with_creation_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut(CallSettings) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut backoff = Backoff::new(&self.options.creation_retry, self.clock.now());
        loop {
            backoff.record_attempt();
            let call = CallSettings::new(cancel.clone());
            let error = match call.run(op(call.clone())).await {
                Ok(value) => return Ok(value),
                Err(e) if e.code.is_transient() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = backoff.next_delay(self.clock.now(), error.retry_delay) else {
                return Err(error);
            };
            tracing::warn!(
                database = %self.database,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "session creation failed, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RpcError::cancelled()),
                () = self.clock.sleep(delay) => {}
            }
        }
    }

    /// Bring the pool up to its minimum size.
    pub(crate) async fn replenish(&self) -> Result<(), RpcError> {
        let wanted = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Ok(());
            }
            let total = state.total();
            let wanted = (self.options.min_sessions as usize)
                .saturating_sub(total)
                .min(self.max().saturating_sub(total));
            state.reserved += wanted;
            if wanted == 0 {
                self.update_readiness(&state);
            }
            wanted
        };
        if wanted == 0 {
            return Ok(());
        }

        tracing::debug!(database = %self.database, count = wanted, "creating sessions");

        let mut remaining = wanted;
        let mut outcome = Ok(());
        while remaining > 0 {
            let rpc = Arc::clone(&self.rpc);
            let database = self.database.clone();
            let batch = self
                .with_creation_retry(&self.background, move |call| {
                    let rpc = Arc::clone(&rpc);
                    let database = database.clone();
                    async move {
                        rpc.batch_create_sessions(&database, remaining, &call)
                            .await
                    }
                })
                .await;

            match batch {
                Ok(infos) if infos.is_empty() => {
                    outcome = Err(RpcError::new(Code::Internal, "server created no sessions"));
                    break;
                }
                Ok(infos) => {
                    let created = infos.len() as u64;
                    let now = self.clock.now();
                    let mut state = self.state.lock();
                    for info in infos {
                        if remaining == 0 {
                            state.doomed.push(info.name);
                            continue;
                        }
                        remaining -= 1;
                        state.reserved = state.reserved.saturating_sub(1);
                        state.offer(Session::new(info.name, now));
                    }
                    self.update_readiness(&state);
                    drop(state);
                    self.metrics.lock().sessions_created += created;
                }
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }

        if remaining > 0 {
            let mut state = self.state.lock();
            state.reserved = state.reserved.saturating_sub(remaining);
            state.grant_slots(self.max());
        }
        self.changed.notify_waiters();

        if let Err(error) = &outcome {
            tracing::warn!(
                database = %self.database,
                missing = remaining,
                error = %error,
                "failed to bring session pool to its minimum size"
            );
            self.readiness.send_if_modified(|r| {
                if matches!(r, Readiness::Pending) {
                    *r = Readiness::Failed(error.clone());
                    true
                } else {
                    false
                }
            });
        }
        outcome
    }

    /// Return a checked-out session.
    pub(crate) fn release(&self, mut session: Session, healthy: bool) {
        let mut state = self.state.lock();
        if !state.checked_out.remove(&session.name) {
            tracing::warn!(session = %session.name, "ignoring release of a session the pool does not own");
            return;
        }

        if healthy && !state.shut_down {
            session.last_used = self.clock.now();
            state.offer(session);
        } else {
            tracing::debug!(session = %session.name, healthy, "discarding session");
            state.doomed.push(session.name);
            state.grant_slots(self.max());
        }
        drop(state);
        self.changed.notify_waiters();
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
        state.grant_slots(self.max());
        drop(state);
        self.changed.notify_waiters();
    }

    fn return_grant(&self, grant: Grant) {
        match grant {
            Grant::Session(session) => self.release(session, true),
            Grant::Slot => self.release_slot(),
        }
    }

    pub(crate) fn update_readiness(&self, state: &PoolState) {
        if state.idle.len() + state.checked_out.len() >= self.options.min_sessions as usize {
            self.readiness.send_if_modified(|r| {
                if matches!(r, Readiness::Ready) {
                    false
                } else {
                    *r = Readiness::Ready;
                    true
                }
            });
        }
    }
}

impl SessionPool {
    /// Create a pool builder for `database` served by `rpc`.
    #[must_use]
    pub fn builder(database: DatabaseName, rpc: Arc<dyn SpannerRpc>) -> SessionPoolBuilder {
        SessionPoolBuilder::new(database, rpc)
    }

    /// Lease a session.
    ///
    /// Returns an idle session if one exists, creates one if the pool is
    /// below capacity, and otherwise waits in arrival order for a session to
    /// be returned. Waiting ends early when `cancel` fires; a session granted
    /// at that moment goes back to the pool.
    pub async fn acquire(
        &self,
        mode: TransactionMode,
        cancel: &CancellationToken,
    ) -> Result<PooledSession, PoolError> {
        tracing::trace!(database = %self.inner.database, %mode, "acquiring session");
        let result = self.inner.acquire(cancel).await;

        let mut metrics = self.inner.metrics.lock();
        match result {
            Ok(session) => {
                metrics.acquisitions_successful += 1;
                drop(metrics);
                Ok(PooledSession::leased(session, mode, Arc::clone(&self.inner)))
            }
            Err(e) => {
                metrics.acquisitions_failed += 1;
                Err(e)
            }
        }
    }

    /// Wrap a session that was created elsewhere, e.g. by another process
    /// sharing a transaction.
    ///
    /// The lease is not counted by the pool and the session is never
    /// returned to it or deleted by it.
    pub fn detached_session(&self, name: SessionName) -> Result<PooledSession, PoolError> {
        if name.database().as_ref() != Some(&self.inner.database) {
            return Err(PoolError::ForeignSession {
                session: name.to_string(),
                database: self.inner.database.to_string(),
            });
        }
        Ok(PooledSession::detached(Session::new(
            name,
            self.inner.clock.now(),
        )))
    }

    /// Wait until the pool holds its minimum number of sessions.
    ///
    /// Fails with [`PoolError::WarmupFailed`] if the initial warm-up could
    /// not create them.
    pub async fn when_ready(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let mut readiness = self.inner.readiness.subscribe();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PoolError::Cancelled),
            () = self.inner.background.cancelled() => return Err(self.inner.shutdown_error()),
            state = readiness.wait_for(|r| !matches!(r, Readiness::Pending)) => {
                state.map(|r| (*r).clone())
            }
        };

        match outcome {
            Ok(Readiness::Failed(error)) => Err(PoolError::WarmupFailed(error)),
            Ok(_) => Ok(()),
            Err(_) => Err(self.inner.shutdown_error()),
        }
    }

    /// Shut the pool down.
    ///
    /// New acquisitions fail immediately and queued ones are woken with an
    /// error. Idle sessions are deleted at once; checked-out sessions are
    /// deleted as they are returned. Completes when no session remains in
    /// use. Calling it again waits for the same condition.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if !state.shut_down {
                state.shut_down = true;
                let idle: Vec<_> = state.idle.drain(..).map(|s| s.name).collect();
                state.doomed.extend(idle);
                state.waiters.clear();
                tracing::info!(
                    database = %inner.database,
                    in_use = state.checked_out.len(),
                    "session pool shutting down"
                );
            }
        }
        inner.background.cancel();

        loop {
            let notified = inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (doomed, busy) = {
                let mut state = inner.state.lock();
                (
                    std::mem::take(&mut state.doomed),
                    state.checked_out.len() + state.reserved,
                )
            };
            if !doomed.is_empty() {
                inner.delete_sessions(doomed, cancel).await;
                continue;
            }
            if busy == 0 {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
                () = &mut notified => {}
            }
        }

        tracing::info!(database = %inner.database, "session pool shut down");
        Ok(())
    }

    /// Check whether shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Run one maintenance pass now instead of waiting for the next tick.
    pub async fn run_maintenance(&self) {
        self.inner.run_maintenance().await;
    }

    /// Point-in-time counts for this pool.
    #[must_use]
    pub fn statistics(&self) -> DatabaseStatistics {
        let state = self.inner.state.lock();
        DatabaseStatistics {
            database: self.inner.database.to_string(),
            idle_sessions: state.idle.len(),
            active_sessions: state.checked_out.len(),
            creating_sessions: state.reserved,
            pending_acquisitions: state.live_waiters(),
            min_sessions: self.inner.options.min_sessions as usize,
            max_sessions: self.inner.max(),
            shut_down: state.shut_down,
        }
    }

    /// Cumulative counters since the pool was created.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            sessions_created: inner.sessions_created,
            sessions_deleted: inner.sessions_deleted,
            sessions_evicted: inner.sessions_evicted,
            acquisitions_successful: inner.acquisitions_successful,
            acquisitions_failed: inner.acquisitions_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            uptime: self.inner.clock.now() - self.inner.created_at,
        }
    }

    /// The database this pool serves.
    #[must_use]
    pub fn database(&self) -> &DatabaseName {
        &self.inner.database
    }

    /// The pool configuration.
    #[must_use]
    pub fn options(&self) -> &SessionPoolOptions {
        &self.inner.options
    }

    /// The transport sessions are created on.
    #[must_use]
    pub fn rpc(&self) -> &Arc<dyn SpannerRpc> {
        &self.inner.rpc
    }

    /// The clock used for timeouts and maintenance.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &SessionPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Builder for [`SessionPool`].
#[derive(Debug)]
pub struct SessionPoolBuilder {
    database: DatabaseName,
    rpc: Arc<dyn SpannerRpc>,
    options: SessionPoolOptions,
    clock: Arc<dyn Clock>,
}

impl SessionPoolBuilder {
    /// Create a builder with default options.
    #[must_use]
    pub fn new(database: DatabaseName, rpc: Arc<dyn SpannerRpc>) -> Self {
        Self {
            database,
            rpc,
            options: SessionPoolOptions::default(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Set the pool options.
    #[must_use]
    pub fn options(mut self, options: SessionPoolOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the pool and start warm-up and maintenance in the background.
    pub async fn build(self) -> Result<SessionPool, PoolError> {
        self.options.validate()?;

        let initial = if self.options.min_sessions == 0 {
            Readiness::Ready
        } else {
            Readiness::Pending
        };
        let (readiness, _) = watch::channel(initial);

        let inner = Arc::new(PoolInner {
            created_at: self.clock.now(),
            database: self.database,
            options: self.options,
            rpc: self.rpc,
            clock: self.clock,
            state: Mutex::new(PoolState::default()),
            changed: Notify::new(),
            readiness,
            background: CancellationToken::new(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        tracing::info!(
            database = %inner.database,
            min = inner.options.min_sessions,
            max = inner.options.max_sessions,
            "session pool created"
        );

        crate::maintenance::spawn(&inner);
        let warm = Arc::clone(&inner);
        tokio::spawn(async move {
            // Failures are logged and surface through `when_ready`.
            let _ = warm.replenish().await;
        });

        Ok(SessionPool { inner })
    }
}

/// Point-in-time counts for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStatistics {
    /// The database the pool serves.
    pub database: String,
    /// Sessions ready to be leased.
    pub idle_sessions: usize,
    /// Sessions currently leased.
    pub active_sessions: usize,
    /// Sessions being created or health-checked.
    pub creating_sessions: usize,
    /// Callers waiting for a session.
    pub pending_acquisitions: usize,
    /// Configured minimum.
    pub min_sessions: usize,
    /// Configured maximum.
    pub max_sessions: usize,
    /// Whether shutdown has begun.
    pub shut_down: bool,
}

impl DatabaseStatistics {
    /// Sessions counted against the maximum.
    #[must_use]
    pub fn total_sessions(&self) -> usize {
        self.idle_sessions + self.active_sessions + self.creating_sessions
    }

    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_sessions == 0 {
            return 0.0;
        }
        (self.active_sessions as f64 / self.max_sessions as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total_sessions() >= self.max_sessions
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Sessions created since pool start.
    pub sessions_created: u64,
    /// Sessions deleted on the server since pool start.
    pub sessions_deleted: u64,
    /// Idle sessions evicted by maintenance.
    pub sessions_evicted: u64,
    /// Successful acquisitions.
    pub acquisitions_successful: u64,
    /// Failed acquisitions (cancelled, shut down, creation errors).
    pub acquisitions_failed: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that found the session gone.
    pub health_checks_failed: u64,
    /// Time since pool creation.
    pub uptime: std::time::Duration,
}

impl PoolMetrics {
    /// Calculate acquisition success rate (0.0 to 1.0).
    #[must_use]
    pub fn acquisition_success_rate(&self) -> f64 {
        let total = self.acquisitions_successful + self.acquisitions_failed;
        if total == 0 {
            return 1.0;
        }
        self.acquisitions_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stats(idle: usize, active: usize, creating: usize, max: usize) -> DatabaseStatistics {
        DatabaseStatistics {
            database: "projects/p/instances/i/databases/d".into(),
            idle_sessions: idle,
            active_sessions: active,
            creating_sessions: creating,
            pending_acquisitions: 0,
            min_sessions: 0,
            max_sessions: max,
            shut_down: false,
        }
    }

    fn session(name: &str, last_used: Instant) -> Session {
        let mut s = Session::new(
            SessionName::parse(format!(
                "projects/p/instances/i/databases/d/sessions/{name}"
            ))
            .unwrap(),
            last_used,
        );
        s.last_used = last_used;
        s
    }

    #[test]
    fn test_statistics_utilization() {
        let s = stats(5, 10, 0, 20);
        assert!((s.utilization() - 50.0).abs() < 0.001);
        assert!(!s.is_at_capacity());
        assert!(stats(5, 10, 5, 20).is_at_capacity());
    }

    #[test]
    fn test_statistics_serialize() {
        let json = serde_json::to_value(stats(1, 2, 3, 10)).unwrap();
        assert_eq!(json["idle_sessions"], 1);
        assert_eq!(json["active_sessions"], 2);
        assert_eq!(json["creating_sessions"], 3);
    }

    #[test]
    fn test_metrics_success_rate() {
        let metrics = PoolMetrics {
            sessions_created: 10,
            sessions_deleted: 2,
            sessions_evicted: 1,
            acquisitions_successful: 95,
            acquisitions_failed: 5,
            health_checks_performed: 50,
            health_checks_failed: 2,
            uptime: std::time::Duration::from_secs(3600),
        };
        assert!((metrics.acquisition_success_rate() - 0.95).abs() < 0.001);
        assert!((metrics.health_check_success_rate() - 0.96).abs() < 0.001);
    }

    #[test]
    fn test_idle_stays_ordered_by_last_use() {
        let base = Instant::now();
        let mut state = PoolState::default();
        state.offer(session("b", base + std::time::Duration::from_secs(2)));
        state.offer(session("a", base));
        state.offer(session("c", base + std::time::Duration::from_secs(5)));

        let order: Vec<_> = state
            .idle
            .iter()
            .map(|s| s.name.as_str().rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_offer_prefers_waiters() {
        let mut state = PoolState::default();
        let (tx, mut rx) = oneshot::channel();
        state.waiters.push_back(tx);

        state.offer(session("a", Instant::now()));
        assert!(state.idle.is_empty());
        assert_eq!(state.checked_out.len(), 1);
        assert!(matches!(rx.try_recv().unwrap(), Grant::Session(_)));
    }

    #[test]
    fn test_offer_skips_abandoned_waiters() {
        let mut state = PoolState::default();
        let (tx, rx) = oneshot::channel::<Grant>();
        drop(rx);
        state.waiters.push_back(tx);

        state.offer(session("a", Instant::now()));
        assert_eq!(state.idle.len(), 1);
        assert!(state.checked_out.is_empty());
    }

    #[test]
    fn test_grant_slots_respects_capacity() {
        let mut state = PoolState::default();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            receivers.push(rx);
        }
        state.reserved = 1;

        state.grant_slots(3);
        assert_eq!(state.reserved, 3);
        assert_eq!(state.waiters.len(), 1);
    }

    #[test]
    fn test_offer_after_shutdown_dooms_session() {
        let mut state = PoolState {
            shut_down: true,
            ..Default::default()
        };
        state.offer(session("a", Instant::now()));
        assert!(state.idle.is_empty());
        assert_eq!(state.doomed.len(), 1);
    }
}

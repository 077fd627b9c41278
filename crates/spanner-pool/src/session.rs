//! Sessions and pool leases.

use std::sync::Arc;

use spanner_protocol::{SessionName, TransactionMode};
use tokio::time::Instant;

use crate::pool::PoolInner;

/// A server-side session tracked by the pool.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) name: SessionName,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
    pub(crate) last_checked: Instant,
}

impl Session {
    pub(crate) fn new(name: SessionName, now: Instant) -> Self {
        Self {
            name,
            created_at: now,
            last_used: now,
            last_checked: now,
        }
    }
}

/// A session leased from a [`SessionPool`](crate::SessionPool).
///
/// While a lease exists the session is counted as in use and is never handed
/// to another caller. Dropping the lease returns the session to the pool;
/// a lease marked unhealthy is deleted instead.
///
/// Detached leases, created for sessions that outlive a single process, are
/// not counted by the pool and are never returned to it.
#[derive(Debug)]
pub struct PooledSession {
    session: Session,
    mode: TransactionMode,
    healthy: bool,
    pool: Option<Arc<PoolInner>>,
}

impl PooledSession {
    pub(crate) fn leased(session: Session, mode: TransactionMode, pool: Arc<PoolInner>) -> Self {
        Self {
            session,
            mode,
            healthy: true,
            pool: Some(pool),
        }
    }

    pub(crate) fn detached(session: Session) -> Self {
        Self {
            session,
            mode: TransactionMode::None,
            healthy: true,
            pool: None,
        }
    }

    /// The server-assigned session name.
    #[must_use]
    pub fn name(&self) -> &SessionName {
        &self.session.name
    }

    /// When the pool created this session.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.session.created_at
    }

    /// The transaction mode this session was leased for.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Whether this lease is outside the pool's accounting.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.pool.is_none()
    }

    /// Whether the session will be reused after release.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Mark the session as unusable, e.g. after the server reported it gone.
    ///
    /// The pool deletes it on release instead of reusing it.
    pub fn mark_unhealthy(&mut self) {
        if self.healthy {
            tracing::debug!(session = %self.name(), "session marked unhealthy");
        }
        self.healthy = false;
    }

    /// Return the session to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            tracing::trace!(session = %self.session.name, healthy = self.healthy, "returning session to pool");
            pool.release(self.session.clone(), self.healthy);
        }
    }
}

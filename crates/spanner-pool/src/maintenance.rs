//! Background pool maintenance.
//!
//! Each pass deletes discarded sessions, evicts sessions idle for longer
//! than the eviction delay, pings idle sessions that have not been verified
//! recently and tops the pool back up to its minimum.

use std::sync::Arc;

use futures_util::future::join_all;
use spanner_protocol::{CallSettings, CancellationToken, Code, SessionName};
use tokio::task::JoinHandle;

use crate::pool::PoolInner;
use crate::session::Session;

/// Start the maintenance loop for `pool`.
///
/// The loop holds only a weak reference and stops when the pool is dropped
/// or shut down.
pub(crate) fn spawn(pool: &Arc<PoolInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(pool);
    let token = pool.background.clone();
    let clock = Arc::clone(&pool.clock);
    let interval = pool.options.maintenance_interval;
    let database = pool.database.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = clock.sleep(interval) => {}
            }
            let Some(pool) = weak.upgrade() else {
                break;
            };
            pool.run_maintenance().await;
        }
        tracing::debug!(database = %database, "session pool maintenance stopped");
    })
}

impl PoolInner {
    pub(crate) async fn run_maintenance(&self) {
        self.delete_doomed().await;
        self.evict_idle().await;
        self.health_check().await;
        // Failures are logged by `replenish`; the next pass tries again.
        let _ = self.replenish().await;
    }

    async fn delete_doomed(&self) {
        let doomed = std::mem::take(&mut self.state.lock().doomed);
        self.delete_sessions(doomed, &self.background).await;
    }

    /// Best-effort deletion of sessions on the server.
    pub(crate) async fn delete_sessions(&self, names: Vec<SessionName>, cancel: &CancellationToken) {
        if names.is_empty() {
            return;
        }

        let deletes = names.iter().map(|name| {
            let call = CallSettings::new(cancel.clone());
            async move { call.run(self.rpc.delete_session(name, &call)).await }
        });
        let results = join_all(deletes).await;

        let mut deleted = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => tracing::debug!(session = %name, error = %e, "failed to delete session"),
            }
        }
        self.metrics.lock().sessions_deleted += deleted;
    }

    async fn evict_idle(&self) {
        let now = self.clock.now();
        let victims = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            let min = self.options.min_sessions as usize;
            let mut victims = Vec::new();
            while state.total() > min {
                let expired = state.idle.front().is_some_and(|s| {
                    now.saturating_duration_since(s.last_used) >= self.options.idle_eviction_delay
                });
                if !expired {
                    break;
                }
                if let Some(s) = state.idle.pop_front() {
                    victims.push(s.name);
                }
            }
            victims
        };
        if victims.is_empty() {
            return;
        }

        tracing::debug!(database = %self.database, count = victims.len(), "evicting idle sessions");
        self.metrics.lock().sessions_evicted += victims.len() as u64;
        self.delete_sessions(victims, &self.background).await;
    }

    async fn health_check(&self) {
        let now = self.clock.now();
        let batch: Vec<Session> = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            let limit = self.options.health_check_batch_size as usize;
            let mut batch = Vec::new();
            let mut index = 0;
            while index < state.idle.len() && batch.len() < limit {
                let due = now.saturating_duration_since(state.idle[index].last_checked)
                    >= self.options.health_check_interval;
                if !due {
                    index += 1;
                } else if let Some(s) = state.idle.remove(index) {
                    batch.push(s);
                }
            }
            state.reserved += batch.len();
            batch
        };
        if batch.is_empty() {
            return;
        }

        let checks = batch.iter().map(|session| {
            let call = CallSettings::new(self.background.clone());
            async move { call.run(self.rpc.get_session(&session.name, &call)).await }
        });
        let results = join_all(checks).await;

        let performed = batch.len() as u64;
        let mut failed = 0;
        let mut state = self.state.lock();
        for (mut session, result) in batch.into_iter().zip(results) {
            state.reserved = state.reserved.saturating_sub(1);
            match result {
                Ok(_) => {
                    session.last_checked = now;
                    state.offer(session);
                }
                Err(e) if e.code == Code::NotFound => {
                    tracing::debug!(session = %session.name, "session no longer exists on the server");
                    failed += 1;
                }
                Err(e) => {
                    tracing::debug!(session = %session.name, error = %e, "health check inconclusive, keeping session");
                    state.offer(session);
                }
            }
        }
        state.grant_slots(self.max());
        drop(state);
        self.changed.notify_waiters();

        let mut metrics = self.metrics.lock();
        metrics.health_checks_performed += performed;
        metrics.health_checks_failed += failed;
    }
}

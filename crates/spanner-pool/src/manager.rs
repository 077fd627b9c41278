//! Reference-counted registry of session pools.
//!
//! Connections with equal [`SessionPoolKey`]s share one [`SessionPool`].
//! The first acquirer for a key creates the transport and the pool; later
//! acquirers wait for that single creation. When the last reference is
//! released the pool is removed and shut down in the background.
//!
//! The registry lock is only held for map bookkeeping. Pool creation,
//! credential resolution and shutdown all run outside it.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use hashbrown::HashMap;
use parking_lot::Mutex;
use spanner_protocol::{
    CallSettings, CancellationToken, Clock, DatabaseName, TokioClock, TransportFactory,
    TransportOptions,
};

use crate::config::SessionPoolOptions;
use crate::error::PoolError;
use crate::pool::{DatabaseStatistics, SessionPool};

/// Identifies a pool: one database, one transport configuration, one set of
/// pool options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionPoolKey {
    /// The database sessions are created in.
    pub database: DatabaseName,
    /// Endpoint and credentials of the transport.
    pub transport: TransportOptions,
    /// Pool sizing and maintenance options.
    pub options: SessionPoolOptions,
}

impl SessionPoolKey {
    /// Create a key.
    #[must_use]
    pub fn new(
        database: DatabaseName,
        transport: TransportOptions,
        options: SessionPoolOptions,
    ) -> Self {
        Self {
            database,
            transport,
            options,
        }
    }
}

type PendingPool = Shared<BoxFuture<'static, Result<SessionPool, PoolError>>>;

struct PoolEntry {
    refs: usize,
    pool: PendingPool,
}

impl PoolEntry {
    fn ready(&self) -> Option<&SessionPool> {
        match self.pool.peek() {
            Some(Ok(pool)) => Some(pool),
            _ => None,
        }
    }
}

/// Shares session pools between connections.
///
/// Clones share the same registry.
#[derive(Debug, Clone)]
pub struct SessionPoolManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    pools: Mutex<HashMap<SessionPoolKey, PoolEntry>>,
}

impl std::fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPoolManager")
            .field("factory", &self.factory)
            .field("pools", &self.pools.lock().len())
            .finish()
    }
}

impl SessionPoolManager {
    /// Create a manager that builds transports with `factory`.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_clock(factory, Arc::new(TokioClock))
    }

    /// Create a manager whose pools read time from `clock`.
    pub fn with_clock(factory: Arc<dyn TransportFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                clock,
                pools: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The clock handed to every pool this manager creates.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Take a reference to the pool for `key`, creating it if needed.
    ///
    /// Concurrent callers with the same key share a single creation. If
    /// creation fails, every caller waiting on it receives the error and the
    /// key is left without a pool, so the next call starts afresh.
    pub async fn acquire_pool(
        &self,
        key: &SessionPoolKey,
        cancel: &CancellationToken,
    ) -> Result<SessionPool, PoolError> {
        key.options.validate()?;

        let pending = {
            let mut pools = self.inner.pools.lock();
            let entry = pools.entry(key.clone()).or_insert_with(|| {
                let factory = Arc::clone(&self.inner.factory);
                let clock = Arc::clone(&self.inner.clock);
                let key = key.clone();
                PoolEntry {
                    refs: 0,
                    pool: async move { create_pool(factory.as_ref(), clock, &key).await }
                        .boxed()
                        .shared(),
                }
            });
            entry.refs += 1;
            entry.pool.clone()
        };

        // Dropped or cancelled callers give their reference back.
        let guard = ReferenceGuard {
            manager: self,
            key,
            pending: &pending,
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            pool = pending.clone() => Some(pool),
        };
        let Some(result) = outcome else {
            return Err(PoolError::Cancelled);
        };
        std::mem::forget(guard);

        if let Err(e) = &result {
            tracing::warn!(database = %key.database, error = %e, "session pool creation failed");
            self.discard_failed(key, &pending);
        }
        result
    }

    /// Give back a reference taken by [`acquire_pool`](Self::acquire_pool).
    ///
    /// When the count reaches zero the pool is removed and shut down in the
    /// background; the caller does not wait for it. Returns `true` if this
    /// release scheduled a shutdown.
    pub fn release_pool(&self, pool: &SessionPool) -> bool {
        let retired = {
            let mut pools = self.inner.pools.lock();
            let key = pools.iter().find_map(|(key, entry)| {
                entry
                    .ready()
                    .is_some_and(|p| p.ptr_eq(pool))
                    .then(|| key.clone())
            });
            let Some(key) = key else {
                tracing::warn!(database = %pool.database(), "release of an unknown session pool ignored");
                return false;
            };
            match pools.get_mut(&key) {
                Some(entry) if entry.refs > 1 => {
                    entry.refs -= 1;
                    None
                }
                _ => pools.remove(&key).and_then(|entry| entry.ready().cloned()),
            }
        };

        match retired {
            Some(pool) => {
                tracing::debug!(database = %pool.database(), "last reference released, shutting down pool");
                Self::spawn_shutdown(pool);
                true
            }
            None => false,
        }
    }

    /// Statistics for the pool registered under `key`, if it exists.
    #[must_use]
    pub fn database_statistics(&self, key: &SessionPoolKey) -> Option<DatabaseStatistics> {
        self.pool(key).map(|pool| pool.statistics())
    }

    /// The initialized pool registered under `key`, if any.
    #[must_use]
    pub fn pool(&self, key: &SessionPoolKey) -> Option<SessionPool> {
        self.inner
            .pools
            .lock()
            .get(key)
            .and_then(|entry| entry.ready().cloned())
    }

    /// Outstanding references for `key`.
    #[must_use]
    pub fn reference_count(&self, key: &SessionPoolKey) -> usize {
        self.inner
            .pools
            .lock()
            .get(key)
            .map_or(0, |entry| entry.refs)
    }

    /// Number of registered pools, including ones still being created.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner.pools.lock().len()
    }

    /// Remove every pool and wait for all of them to shut down.
    pub async fn shutdown_all(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        let pools: Vec<SessionPool> = {
            let mut map = self.inner.pools.lock();
            map.drain()
                .filter_map(|(_, entry)| entry.ready().cloned())
                .collect()
        };
        tracing::info!(count = pools.len(), "shutting down all session pools");

        for result in futures_util::future::join_all(pools.iter().map(|p| p.shutdown(cancel))).await
        {
            result?;
        }
        Ok(())
    }

    fn forget_reference(&self, key: &SessionPoolKey, pending: &PendingPool) {
        let retired = {
            let mut pools = self.inner.pools.lock();
            match pools.get_mut(key) {
                Some(entry) if entry.pool.ptr_eq(pending) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    if entry.refs == 0 {
                        pools.remove(key).and_then(|entry| entry.ready().cloned())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(pool) = retired {
            Self::spawn_shutdown(pool);
        }
    }

    fn discard_failed(&self, key: &SessionPoolKey, pending: &PendingPool) {
        let mut pools = self.inner.pools.lock();
        if pools.get(key).is_some_and(|entry| entry.pool.ptr_eq(pending)) {
            pools.remove(key);
        }
    }

    fn spawn_shutdown(pool: SessionPool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(database = %pool.database(), "session pool released outside a runtime, not shut down");
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = pool.shutdown(&CancellationToken::new()).await {
                tracing::warn!(database = %pool.database(), error = %e, "session pool shutdown failed");
            }
        });
    }
}

struct ReferenceGuard<'a> {
    manager: &'a SessionPoolManager,
    key: &'a SessionPoolKey,
    pending: &'a PendingPool,
}

impl Drop for ReferenceGuard<'_> {
    fn drop(&mut self) {
        self.manager.forget_reference(self.key, self.pending);
    }
}

async fn create_pool(
    factory: &dyn TransportFactory,
    clock: Arc<dyn Clock>,
    key: &SessionPoolKey,
) -> Result<SessionPool, PoolError> {
    let credentials = key.transport.credentials.token_source();
    if let Some(source) = &credentials {
        source.access_token().await?;
    }

    let call = CallSettings::default();
    let rpc = call
        .run(factory.create(&key.transport, credentials))
        .await
        .map_err(PoolError::from_call)?;

    let pool = SessionPool::builder(key.database.clone(), rpc)
        .options(key.options.clone())
        .clock(clock)
        .build()
        .await?;

    tracing::info!(
        database = %key.database,
        endpoint = %key.transport.endpoint,
        "session pool registered"
    );
    Ok(pool)
}

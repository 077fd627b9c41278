//! Connection lifecycle and transaction entry points.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spanner_pool::{DatabaseStatistics, SessionPool, SessionPoolKey, SessionPoolManager};
use spanner_protocol::{
    CallSettings, CancellationToken, Mutation, RpcError, SessionName, Statement, TimestampBound,
    TransactionId, TransactionOptions,
};
use tracing::Instrument;

use crate::command::Command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::instrumentation::{
    DB_SYSTEM, DatabaseMetrics, OperationTimer, SanitizationConfig, attributes, span_names,
};
use crate::state::{ConnectionState, StateChange, StateListeners};
use crate::transaction::{
    EphemeralTransaction, RetriableTransaction, Transaction, TransactionKind, TransactionStrategy,
};

/// A logical connection to one database.
///
/// Opening a connection takes a reference to the shared session pool for
/// its configuration; closing gives it back. Connections with equal
/// configurations share a pool through the [`SessionPoolManager`].
///
/// A connection may hold one *ambient* transaction: commands that name no
/// transaction of their own run in it.
pub struct Connection {
    config: Config,
    manager: SessionPoolManager,
    inner: Mutex<Inner>,
    listeners: StateListeners,
    metrics: Arc<DatabaseMetrics>,
    sanitization: SanitizationConfig,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    pool: Option<SessionPool>,
    ambient: Option<Transaction>,
}

impl Connection {
    /// Create a closed connection.
    pub fn new(config: Config, manager: SessionPoolManager) -> Self {
        let database = config
            .database
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let metrics = DatabaseMetrics::new(&database, &config.host);
        Self {
            config,
            manager,
            inner: Mutex::new(Inner::default()),
            listeners: StateListeners::default(),
            metrics: Arc::new(metrics),
            sanitization: SanitizationConfig::default(),
        }
    }

    /// Set how statements are recorded in spans.
    #[must_use]
    pub fn with_sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }

    /// The configuration the connection was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Register a callback for state transitions.
    ///
    /// Callbacks run on the task that caused the transition, before the
    /// call that caused it returns.
    pub fn on_state_change(&self, listener: impl Fn(StateChange) + Send + Sync + 'static) {
        self.listeners.add(Arc::new(listener));
    }

    /// Open the connection, creating the session pool if this is the first
    /// connection for its configuration.
    ///
    /// Opening an open connection does nothing. On failure the connection
    /// is left [`Broken`](ConnectionState::Broken) and may be opened again.
    pub async fn open(&self, cancel: &CancellationToken) -> Result<()> {
        let key = self.config.pool_key()?;

        let previous = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(Error::InvalidState("connection is already opening".into()));
                }
                previous => {
                    inner.state = ConnectionState::Connecting;
                    previous
                }
            }
        };
        self.listeners.notify(StateChange {
            previous,
            current: ConnectionState::Connecting,
        });
        let guard = OpeningGuard { connection: self };

        tracing::info!(database = %key.database, endpoint = %self.config.endpoint(), "opening connection");
        let result = self
            .acquire_pool(&key, cancel)
            .instrument(tracing::info_span!(
                span_names::CONNECT,
                { attributes::DB_SYSTEM } = DB_SYSTEM,
                { attributes::DB_NAME } = %key.database,
                { attributes::SERVER_ADDRESS } = %self.config.endpoint(),
            ))
            .await;
        let (current, outcome) = {
            let mut inner = self.inner.lock();
            match result {
                Ok(pool) => {
                    inner.pool = Some(pool);
                    inner.state = ConnectionState::Open;
                    (ConnectionState::Open, Ok(()))
                }
                Err(e) => {
                    inner.state = ConnectionState::Broken;
                    (ConnectionState::Broken, Err(e))
                }
            }
        };
        std::mem::forget(guard);
        match &outcome {
            Ok(()) => tracing::info!(database = %key.database, "connection opened"),
            Err(e) => tracing::warn!(database = %key.database, error = %e, "connection failed to open"),
        }
        self.listeners.notify(StateChange {
            previous: ConnectionState::Connecting,
            current,
        });
        outcome
    }

    async fn acquire_pool(&self, key: &SessionPoolKey, cancel: &CancellationToken) -> Result<SessionPool> {
        tokio::select! {
            result = self.manager.acquire_pool(key, cancel) => Ok(result?),
            () = self.manager.clock().sleep(self.config.connect_timeout) => Err(Error::Rpc(RpcError::new(
                spanner_protocol::Code::DeadlineExceeded,
                format!("connection not opened within {:?}", self.config.connect_timeout),
            ))),
        }
    }

    /// Close the connection and give back its pool reference.
    ///
    /// An ambient transaction that is still active is dropped, which rolls
    /// it back. Closing a closed connection does nothing.
    pub fn close(&self) {
        let (previous, pool, ambient) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Open | ConnectionState::Broken => {
                    let previous = inner.state;
                    inner.state = ConnectionState::Closed;
                    (previous, inner.pool.take(), inner.ambient.take())
                }
                ConnectionState::Closed | ConnectionState::Connecting => return,
            }
        };
        drop(ambient);
        if let Some(pool) = pool {
            tracing::info!(database = %pool.database(), "closing connection");
            self.manager.release_pool(&pool);
        }
        self.listeners.notify(StateChange {
            previous,
            current: ConnectionState::Closed,
        });
    }

    /// Begin a transaction with `options`.
    ///
    /// The caller completes it with [`Transaction::commit`] or
    /// [`Transaction::rollback`].
    pub async fn begin_transaction(
        &self,
        options: TransactionOptions,
        cancel: &CancellationToken,
    ) -> Result<Transaction> {
        let pool = self.pool()?;
        let call = CallSettings::new(cancel.clone())
            .with_timeout(pool.clock(), self.config.command_timeout);
        let timer = OperationTimer::start("BEGIN");
        let result = Transaction::begin(
            &pool,
            options,
            TransactionKind::Explicit,
            self.config.command_timeout,
            &call,
        )
        .instrument(tracing::debug_span!(
            span_names::BEGIN_TRANSACTION,
            read_only = options.is_read_only()
        ))
        .await;
        timer.finish(&self.metrics, result.is_ok());
        result
    }

    /// Begin a read-only transaction reading at `bound`.
    ///
    /// Only bounds usable by multi-use transactions are accepted.
    pub async fn begin_read_only_transaction(
        &self,
        bound: TimestampBound,
        cancel: &CancellationToken,
    ) -> Result<Transaction> {
        self.begin_transaction(TransactionOptions::ReadOnly(bound), cancel)
            .await
    }

    /// Resume a read-only transaction that another client began, given its
    /// session and transaction id.
    ///
    /// The session is used detached: it is neither returned to this
    /// connection's pool nor deleted by it.
    pub fn begin_read_only_transaction_from_id(
        &self,
        session: SessionName,
        transaction: TransactionId,
    ) -> Result<Transaction> {
        let pool = self.pool()?;
        let lease = pool.detached_session(session)?;
        Ok(Transaction::resume(
            lease,
            transaction,
            &pool,
            self.config.command_timeout,
        ))
    }

    /// The retry loop used by
    /// [`run_with_retriable_transaction`](Self::run_with_retriable_transaction).
    pub fn retriable_transaction(&self) -> Result<RetriableTransaction> {
        let pool = self.pool()?;
        Ok(
            RetriableTransaction::new(pool, self.config.transaction_retry.clone())
                .command_timeout(self.config.command_timeout)
                .metrics(Arc::clone(&self.metrics)),
        )
    }

    /// Run `work` in a read-write transaction, retrying it from the start
    /// whenever the transaction is aborted.
    pub async fn run_with_retriable_transaction<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retriable_transaction()?.run(work, cancel).await
    }

    /// Make `transaction` the ambient transaction for commands that name
    /// none.
    ///
    /// A completed ambient transaction is replaced silently; an active one
    /// must be taken first.
    pub fn enlist_transaction(&self, transaction: Transaction) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.is_open() {
            return Err(not_open(inner.state));
        }
        if inner.ambient.as_ref().is_some_and(|t| !t.is_completed()) {
            return Err(Error::InvalidState(
                "connection already has an active ambient transaction".into(),
            ));
        }
        tracing::debug!({ attributes::DB_SESSION } = %transaction.session_name(), "transaction enlisted");
        inner.ambient = Some(transaction);
        Ok(())
    }

    /// The active ambient transaction, if any.
    #[must_use]
    pub fn ambient_transaction(&self) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        if inner.ambient.as_ref().is_some_and(Transaction::is_completed) {
            inner.ambient = None;
        }
        inner.ambient.clone()
    }

    /// Remove and return the ambient transaction.
    pub fn take_ambient_transaction(&self) -> Option<Transaction> {
        self.inner.lock().ambient.take()
    }

    /// A command running `sql`.
    pub fn create_command(&self, sql: impl Into<String>) -> Command<'_> {
        Command::sql(self, Statement::new(sql))
    }

    /// A command writing `mutations`.
    pub fn create_mutation_command(&self, mutations: Vec<Mutation>) -> Command<'_> {
        Command::mutations(self, mutations)
    }

    /// Execute DML statements in order, in the ambient transaction or a
    /// transaction of their own, and return each row count.
    pub async fn execute_batch_dml(
        &self,
        statements: Vec<Statement>,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>> {
        let strategy = self.strategy(None, TimestampBound::Strong)?;
        let call = self.call_settings(&strategy, cancel, None);
        let span = tracing::debug_span!(
            span_names::BATCH_DML,
            statements = statements.len(),
            strategy = strategy.name()
        );
        let timer = OperationTimer::start("BATCH");
        let result = strategy
            .execute_batch_dml(statements, &call)
            .instrument(span)
            .await;
        timer.finish(&self.metrics, result.is_ok());
        result
    }

    /// The session pool of an open connection.
    pub fn acquire_session_pool(&self) -> Result<SessionPool> {
        self.pool()
    }

    /// Counts for this connection's pool, if it exists.
    #[must_use]
    pub fn session_pool_statistics(&self) -> Option<DatabaseStatistics> {
        let key = self.config.pool_key().ok()?;
        let stats = self.manager.database_statistics(&key)?;
        self.metrics.record_pool_status(
            stats.active_sessions as u64,
            stats.idle_sessions as u64,
            stats.max_sessions as u64,
            stats.pending_acquisitions as u64,
        );
        Some(stats)
    }

    /// Wait until the pool has created its minimum number of sessions.
    pub async fn when_session_pool_ready(&self, cancel: &CancellationToken) -> Result<()> {
        self.pool()?.when_ready(cancel).await?;
        Ok(())
    }

    /// Shut the pool down for every connection sharing it.
    ///
    /// Returns once every leased session has been returned and all sessions
    /// are deleted. Later acquisitions fail.
    pub async fn shutdown_session_pool(&self, cancel: &CancellationToken) -> Result<()> {
        self.pool()?.shutdown(cancel).await?;
        Ok(())
    }

    pub(crate) fn metrics(&self) -> &DatabaseMetrics {
        &self.metrics
    }

    pub(crate) fn sanitization(&self) -> &SanitizationConfig {
        &self.sanitization
    }

    /// Strategy for a command: its own transaction, else the ambient one,
    /// else a per-operation transaction.
    pub(crate) fn strategy(
        &self,
        explicit: Option<&Transaction>,
        bound: TimestampBound,
    ) -> Result<TransactionStrategy> {
        if let Some(transaction) = explicit {
            return Ok(TransactionStrategy::for_transaction(transaction.clone()));
        }
        let inner = self.inner.lock();
        if !inner.state.is_open() {
            return Err(not_open(inner.state));
        }
        if let Some(ambient) = inner.ambient.as_ref().filter(|t| !t.is_completed()) {
            return Ok(TransactionStrategy::for_transaction(ambient.clone()));
        }
        let pool = inner.pool.clone().ok_or_else(|| not_open(inner.state))?;
        Ok(TransactionStrategy::Ephemeral(EphemeralTransaction::new(pool, bound)))
    }

    /// Call settings for one command; `timeout` overrides the configured
    /// command timeout.
    pub(crate) fn call_settings(
        &self,
        strategy: &TransactionStrategy,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> CallSettings {
        let timeout = timeout.or(self.config.command_timeout);
        CallSettings::new(cancel.clone()).with_timeout(strategy.clock(), timeout)
    }

    fn pool(&self) -> Result<SessionPool> {
        let inner = self.inner.lock();
        match (&inner.pool, inner.state) {
            (Some(pool), ConnectionState::Open) => Ok(pool.clone()),
            (_, state) => Err(not_open(state)),
        }
    }
}

/// Leaves `Connecting` for `Broken` when an `open` future is dropped before
/// it finishes.
struct OpeningGuard<'a> {
    connection: &'a Connection,
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        {
            let mut inner = self.connection.inner.lock();
            if inner.state != ConnectionState::Connecting {
                return;
            }
            inner.state = ConnectionState::Broken;
        }
        tracing::warn!(database = ?self.connection.config.database, "connection open abandoned");
        self.connection.listeners.notify(StateChange {
            previous: ConnectionState::Connecting,
            current: ConnectionState::Broken,
        });
    }
}

fn not_open(state: ConnectionState) -> Error {
    Error::InvalidState(format!("connection is {state}"))
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Connection")
            .field("database", &self.config.database)
            .field("state", &inner.state)
            .field("ambient_transaction", &inner.ambient.is_some())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

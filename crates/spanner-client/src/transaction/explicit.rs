//! Explicitly begun transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use spanner_pool::{PooledSession, SessionPool};
use spanner_protocol::{
    CallSettings, CancellationToken, Clock, CommitRequest, CommitTransaction,
    ExecuteBatchDmlRequest, ExecuteSqlRequest, Mutation, SessionName, SpannerRpc, Statement,
    TimestampBound, TransactionId, TransactionOptions, TransactionSelector,
};
use tokio::sync::{Mutex, MutexGuard};

use super::{acquire_session, on_session, row_count};
use crate::error::{Error, Result};
use crate::stream::RowStream;

/// How a [`Transaction`] came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Begun by the caller, who commits or rolls it back.
    Explicit,
    /// One attempt of a retriable transaction; its retry loop completes it.
    Retriable,
    /// A read-only transaction begun elsewhere and resumed by id on a
    /// detached session.
    Detached,
}

/// A transaction bound to one session.
///
/// Handles are cheap to clone and share one transaction. Calls through any
/// handle are serialized. The session goes back to the pool when the
/// transaction is committed or rolled back, or when the last handle is
/// dropped; a read-write transaction dropped while still active is rolled
/// back in the background.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

struct Inner {
    id: TransactionId,
    options: TransactionOptions,
    read_timestamp: Option<DateTime<Utc>>,
    session_name: SessionName,
    kind: TransactionKind,
    rpc: Arc<dyn SpannerRpc>,
    clock: Arc<dyn Clock>,
    command_timeout: Option<Duration>,
    completed: AtomicBool,
    state: Mutex<State>,
}

struct State {
    // `None` once the transaction has completed.
    session: Option<PooledSession>,
    seqno: i64,
    mutations: Vec<Mutation>,
}

impl Transaction {
    /// Begin a transaction on a session leased from `pool`.
    pub(crate) async fn begin(
        pool: &SessionPool,
        options: TransactionOptions,
        kind: TransactionKind,
        command_timeout: Option<Duration>,
        call: &CallSettings,
    ) -> Result<Self> {
        if matches!(options, TransactionOptions::PartitionedDml) {
            return Err(Error::InvalidArgument(
                "partitioned DML runs without an explicit transaction".into(),
            ));
        }
        options
            .validate_multi_use()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let mut session = acquire_session(pool, options.mode(), call).await?;
        let rpc = Arc::clone(pool.rpc());
        let name = session.name().clone();
        let info = on_session(
            &mut session,
            call,
            rpc.begin_transaction(&name, &options, call),
        )
        .await?;

        tracing::debug!(
            session = %name,
            read_only = options.is_read_only(),
            ?kind,
            "transaction begun"
        );

        Ok(Self::from_parts(
            session,
            info.id,
            options,
            info.read_timestamp,
            kind,
            rpc,
            Arc::clone(pool.clock()),
            command_timeout,
        ))
    }

    /// Resume a read-only transaction begun elsewhere, on a detached lease.
    pub(crate) fn resume(
        session: PooledSession,
        id: TransactionId,
        pool: &SessionPool,
        command_timeout: Option<Duration>,
    ) -> Self {
        tracing::debug!(session = %session.name(), "read-only transaction resumed");
        Self::from_parts(
            session,
            id,
            TransactionOptions::ReadOnly(TimestampBound::Strong),
            None,
            TransactionKind::Detached,
            Arc::clone(pool.rpc()),
            Arc::clone(pool.clock()),
            command_timeout,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        session: PooledSession,
        id: TransactionId,
        options: TransactionOptions,
        read_timestamp: Option<DateTime<Utc>>,
        kind: TransactionKind,
        rpc: Arc<dyn SpannerRpc>,
        clock: Arc<dyn Clock>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                options,
                read_timestamp,
                session_name: session.name().clone(),
                kind,
                rpc,
                clock,
                command_timeout,
                completed: AtomicBool::new(false),
                state: Mutex::new(State {
                    session: Some(session),
                    seqno: 0,
                    mutations: Vec::new(),
                }),
            }),
        }
    }

    /// Server-assigned transaction id.
    #[must_use]
    pub fn id(&self) -> &TransactionId {
        &self.inner.id
    }

    /// Options the transaction was begun with.
    #[must_use]
    pub fn options(&self) -> TransactionOptions {
        self.inner.options
    }

    /// Name of the session the transaction runs on.
    ///
    /// Together with [`id`](Self::id) this lets another process resume a
    /// read-only transaction.
    #[must_use]
    pub fn session_name(&self) -> &SessionName {
        &self.inner.session_name
    }

    /// Timestamp chosen by the server for a read-only transaction.
    #[must_use]
    pub fn read_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.read_timestamp
    }

    /// How the transaction was started.
    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.inner.kind
    }

    /// Whether this is a read-only transaction.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.options.is_read_only()
    }

    /// Whether the transaction has been committed, rolled back or abandoned.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same transaction.
    #[must_use]
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Execute a query in this transaction.
    pub async fn execute_query(
        &self,
        statement: Statement,
        cancel: &CancellationToken,
    ) -> Result<RowStream> {
        self.execute_query_with(statement, &self.call(cancel)).await
    }

    /// Execute a DML statement and return the modified row count.
    pub async fn execute_dml(&self, statement: Statement, cancel: &CancellationToken) -> Result<i64> {
        self.execute_dml_with(statement, &self.call(cancel)).await
    }

    /// Execute DML statements in order and return each row count.
    pub async fn execute_batch_dml(
        &self,
        statements: Vec<Statement>,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>> {
        self.execute_batch_dml_with(statements, &self.call(cancel)).await
    }

    /// Buffer mutations to be applied at commit.
    pub async fn buffer_mutations(&self, mutations: Vec<Mutation>) -> Result<()> {
        let mut state = self.active().await?;
        self.require_read_write("mutations")?;
        state.mutations.extend(mutations);
        Ok(())
    }

    /// Commit, applying buffered mutations.
    ///
    /// Returns the commit timestamp for a read-write transaction. A
    /// read-only transaction completes locally and returns `None`.
    pub async fn commit(&self, cancel: &CancellationToken) -> Result<Option<DateTime<Utc>>> {
        self.require_caller_managed()?;
        self.commit_with(&self.call(cancel)).await
    }

    /// Roll back, discarding buffered mutations.
    pub async fn rollback(&self, cancel: &CancellationToken) -> Result<()> {
        self.require_caller_managed()?;
        self.rollback_with(&self.call(cancel)).await
    }

    pub(crate) async fn execute_query_with(
        &self,
        statement: Statement,
        call: &CallSettings,
    ) -> Result<RowStream> {
        let mut state = self.active().await?;
        let request = ExecuteSqlRequest {
            session: self.inner.session_name.clone(),
            transaction: self.selector(),
            statement,
            seqno: 0,
        };
        let session = state.session_mut()?;
        let result = on_session(
            session,
            call,
            self.inner.rpc.execute_streaming_sql(request, call),
        )
        .await?;
        Ok(RowStream::new(result, None))
    }

    pub(crate) async fn execute_dml_with(
        &self,
        statement: Statement,
        call: &CallSettings,
    ) -> Result<i64> {
        let mut state = self.active().await?;
        self.require_read_write("DML")?;
        state.seqno += 1;
        let request = ExecuteSqlRequest {
            session: self.inner.session_name.clone(),
            transaction: self.selector(),
            statement,
            seqno: state.seqno,
        };
        let session = state.session_mut()?;
        let result = on_session(session, call, self.inner.rpc.execute_sql(request, call)).await?;
        row_count(&result)
    }

    pub(crate) async fn execute_batch_dml_with(
        &self,
        statements: Vec<Statement>,
        call: &CallSettings,
    ) -> Result<Vec<i64>> {
        if statements.is_empty() {
            return Err(Error::InvalidArgument("batch DML needs at least one statement".into()));
        }
        let mut state = self.active().await?;
        self.require_read_write("DML")?;
        state.seqno += 1;
        let request = ExecuteBatchDmlRequest {
            session: self.inner.session_name.clone(),
            transaction: self.selector(),
            statements,
            seqno: state.seqno,
        };
        let session = state.session_mut()?;
        let (row_counts, failure) =
            on_session(session, call, self.inner.rpc.execute_batch_dml(request, call)).await?;
        match failure {
            Some(source) => Err(Error::BatchDml { row_counts, source }),
            None => Ok(row_counts),
        }
    }

    pub(crate) async fn commit_with(&self, call: &CallSettings) -> Result<Option<DateTime<Utc>>> {
        let mut state = self.active().await?;
        let Some(mut session) = self.finish(&mut state) else {
            return Err(completed());
        };
        if self.is_read_only() {
            tracing::debug!(session = %self.inner.session_name, "read-only transaction completed");
            return Ok(None);
        }

        let request = CommitRequest {
            session: self.inner.session_name.clone(),
            transaction: CommitTransaction::Id(self.inner.id.clone()),
            mutations: std::mem::take(&mut state.mutations),
        };
        drop(state);
        let response = on_session(&mut session, call, self.inner.rpc.commit(request, call)).await?;
        tracing::debug!(
            session = %self.inner.session_name,
            commit_timestamp = %response.commit_timestamp,
            "transaction committed"
        );
        Ok(Some(response.commit_timestamp))
    }

    pub(crate) async fn rollback_with(&self, call: &CallSettings) -> Result<()> {
        let mut state = self.active().await?;
        let Some(mut session) = self.finish(&mut state) else {
            return Err(completed());
        };
        state.mutations.clear();
        drop(state);
        if self.is_read_only() {
            return Ok(());
        }

        let name = self.inner.session_name.clone();
        on_session(
            &mut session,
            call,
            self.inner.rpc.rollback(&name, &self.inner.id, call),
        )
        .await?;
        tracing::debug!(session = %name, "transaction rolled back");
        Ok(())
    }

    /// Abandon the transaction without telling the server, e.g. after it
    /// was aborted. The session goes back to the pool.
    pub(crate) async fn discard(&self) {
        let mut state = self.inner.state.lock().await;
        if self.finish(&mut state).is_some() {
            tracing::debug!(session = %self.inner.session_name, "transaction discarded");
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    fn call(&self, cancel: &CancellationToken) -> CallSettings {
        CallSettings::new(cancel.clone()).with_timeout(&self.inner.clock, self.inner.command_timeout)
    }

    fn selector(&self) -> TransactionSelector {
        TransactionSelector::Id(self.inner.id.clone())
    }

    async fn active(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.inner.state.lock().await;
        if state.session.is_none() {
            return Err(completed());
        }
        Ok(state)
    }

    fn finish(&self, state: &mut State) -> Option<PooledSession> {
        let session = state.session.take();
        self.inner.completed.store(true, Ordering::Release);
        session
    }

    fn require_read_write(&self, what: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::InvalidState(format!(
                "{what} is not allowed in a read-only transaction"
            )));
        }
        Ok(())
    }

    fn require_caller_managed(&self) -> Result<()> {
        if self.inner.kind == TransactionKind::Retriable {
            return Err(super::managed_by_retry_loop());
        }
        Ok(())
    }
}

impl State {
    fn session_mut(&mut self) -> Result<&mut PooledSession> {
        self.session.as_mut().ok_or_else(completed)
    }
}

fn completed() -> Error {
    Error::InvalidState("transaction has already completed".into())
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("session", &self.inner.session_name)
            .field("options", &self.inner.options)
            .field("kind", &self.inner.kind)
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(session) = self.state.get_mut().session.take() else {
            return;
        };
        if self.options.is_read_only() || session.is_detached() {
            return;
        }

        // Still active: release the server-side locks before the session is
        // reused.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session = %self.session_name, "active transaction dropped outside a runtime");
            return;
        };
        let rpc = Arc::clone(&self.rpc);
        let id = self.id.clone();
        runtime.spawn(async move {
            let mut session = session;
            let name = session.name().clone();
            let call = CallSettings::default();
            match on_session(&mut session, &call, rpc.rollback(&name, &id, &call)).await {
                Ok(()) => tracing::debug!(session = %name, "dropped transaction rolled back"),
                Err(e) => tracing::debug!(session = %name, error = %e, "rollback of dropped transaction failed"),
            }
        });
    }
}

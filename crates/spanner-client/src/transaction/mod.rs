//! Transaction strategies.
//!
//! Every command runs under one of three strategies:
//!
//! - [`EphemeralTransaction`]: no transaction was requested. Each operation
//!   leases a session for just that operation and uses a single-use or
//!   inline-begun transaction.
//! - [`Transaction`]: an explicitly begun transaction. Operations run in it
//!   on its session until it is committed, rolled back or dropped.
//! - [`RetriableTransaction`]: a unit of work that is re-run in a fresh
//!   read-write transaction whenever the server aborts it.
//!
//! [`TransactionStrategy`] puts the three behind one surface so commands
//! dispatch without caring which one they got.

mod ephemeral;
mod explicit;
mod retriable;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use spanner_pool::{PooledSession, SessionPool};
use spanner_protocol::{
    CallSettings, Clock, Mutation, ProtocolError, ResultSet, RpcError, Statement, TransactionMode,
};

pub use ephemeral::EphemeralTransaction;
pub use explicit::{Transaction, TransactionKind};
pub use retriable::RetriableTransaction;

use crate::error::{Error, Result};
use crate::stream::RowStream;

/// The strategy a command runs under.
#[derive(Debug, Clone)]
pub enum TransactionStrategy {
    /// Per-operation session and transaction.
    Ephemeral(EphemeralTransaction),
    /// An explicitly begun transaction, completed by the caller.
    Explicit(Transaction),
    /// The current attempt of a retriable transaction. The retry loop
    /// completes it.
    Retriable(Transaction),
}

impl TransactionStrategy {
    /// The strategy for running inside `transaction`.
    #[must_use]
    pub fn for_transaction(transaction: Transaction) -> Self {
        match transaction.kind() {
            TransactionKind::Retriable => Self::Retriable(transaction),
            TransactionKind::Explicit | TransactionKind::Detached => Self::Explicit(transaction),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ephemeral(_) => "ephemeral",
            Self::Explicit(_) => "explicit",
            Self::Retriable(_) => "retriable",
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        match self {
            Self::Ephemeral(e) => e.clock(),
            Self::Explicit(t) | Self::Retriable(t) => t.clock(),
        }
    }

    /// Execute a query.
    pub async fn execute_query(&self, statement: Statement, call: &CallSettings) -> Result<RowStream> {
        match self {
            Self::Ephemeral(e) => e.execute_query(statement, call).await,
            Self::Explicit(t) | Self::Retriable(t) => t.execute_query_with(statement, call).await,
        }
    }

    /// Execute a DML statement and return the modified row count.
    pub async fn execute_dml(&self, statement: Statement, call: &CallSettings) -> Result<i64> {
        match self {
            Self::Ephemeral(e) => e.execute_dml(statement, call).await,
            Self::Explicit(t) | Self::Retriable(t) => t.execute_dml_with(statement, call).await,
        }
    }

    /// Execute DML statements in order and return each row count.
    pub async fn execute_batch_dml(
        &self,
        statements: Vec<Statement>,
        call: &CallSettings,
    ) -> Result<Vec<i64>> {
        match self {
            Self::Ephemeral(e) => e.execute_batch_dml(statements, call).await,
            Self::Explicit(t) | Self::Retriable(t) => {
                t.execute_batch_dml_with(statements, call).await
            }
        }
    }

    /// Execute a partitioned DML statement and return the lower bound of
    /// modified rows.
    ///
    /// Partitioned DML commits by itself, so it cannot run inside a
    /// transaction.
    pub async fn execute_partitioned_dml(
        &self,
        statement: Statement,
        call: &CallSettings,
    ) -> Result<i64> {
        match self {
            Self::Ephemeral(e) => e.execute_partitioned_dml(statement, call).await,
            Self::Explicit(_) | Self::Retriable(_) => Err(Error::InvalidState(
                "partitioned DML cannot run inside a transaction".into(),
            )),
        }
    }

    /// Write mutations.
    ///
    /// Outside a transaction they are committed at once and the commit
    /// timestamp is returned. Inside one they are buffered until commit.
    pub async fn execute_mutations(
        &self,
        mutations: Vec<Mutation>,
        call: &CallSettings,
    ) -> Result<Option<DateTime<Utc>>> {
        match self {
            Self::Ephemeral(e) => e.execute_mutations(mutations, call).await.map(Some),
            Self::Explicit(t) | Self::Retriable(t) => {
                t.buffer_mutations(mutations).await?;
                Ok(None)
            }
        }
    }

    /// Commit. Returns the commit timestamp when a read-write transaction
    /// was committed.
    pub async fn commit(&self, call: &CallSettings) -> Result<Option<DateTime<Utc>>> {
        match self {
            Self::Ephemeral(_) => Ok(None),
            Self::Explicit(t) => t.commit_with(call).await,
            Self::Retriable(_) => Err(managed_by_retry_loop()),
        }
    }

    /// Roll back.
    pub async fn rollback(&self, call: &CallSettings) -> Result<()> {
        match self {
            Self::Ephemeral(_) => Ok(()),
            Self::Explicit(t) => t.rollback_with(call).await,
            Self::Retriable(_) => Err(managed_by_retry_loop()),
        }
    }
}

fn managed_by_retry_loop() -> Error {
    Error::InvalidState("a retriable transaction is committed by its retry loop".into())
}

/// Lease a session, bounded by the call's deadline as well as its
/// cancellation.
pub(crate) async fn acquire_session(
    pool: &SessionPool,
    mode: TransactionMode,
    call: &CallSettings,
) -> Result<PooledSession> {
    let lease = pool.acquire(mode, call.cancellation());
    let Some(deadline) = call.deadline() else {
        return Ok(lease.await?);
    };
    let clock = pool.clock();
    let expiry = clock.sleep(deadline.saturating_duration_since(clock.now()));
    tokio::select! {
        biased;
        session = lease => Ok(session?),
        () = expiry => Err(Error::Rpc(RpcError::new(
            spanner_protocol::Code::DeadlineExceeded,
            "timed out waiting for a session",
        ))),
    }
}

/// Run one call on `session`, marking the session unhealthy if the server
/// no longer knows it.
pub(crate) async fn on_session<T>(
    session: &mut PooledSession,
    call: &CallSettings,
    rpc: impl Future<Output = std::result::Result<T, RpcError>>,
) -> Result<T> {
    call.run(rpc).await.map_err(|e| {
        if e.is_session_not_found() {
            session.mark_unhealthy();
        }
        Error::from(e)
    })
}

pub(crate) fn row_count(result: &ResultSet) -> Result<i64> {
    result
        .row_count()
        .ok_or_else(|| Error::Protocol(ProtocolError::MissingField("row count")))
}

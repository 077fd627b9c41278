//! Operations outside any transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use spanner_pool::{PooledSession, SessionPool};
use spanner_protocol::{
    CallSettings, Clock, CommitRequest, CommitTransaction, ExecuteBatchDmlRequest, ExecuteSqlRequest,
    Mutation, ProtocolError, Statement, TimestampBound, TransactionId, TransactionMode,
    TransactionOptions, TransactionSelector,
};

use super::{acquire_session, on_session, row_count};
use crate::error::{Error, Result};
use crate::stream::RowStream;

/// Runs each operation in its own short-lived transaction.
///
/// Queries use a single-use read-only transaction with the configured
/// timestamp bound. DML begins a read-write transaction inline with the
/// statement and commits it straight away. Mutations are committed in a
/// single-use read-write transaction. Each operation leases a session and
/// returns it when done; a query's session is held by its [`RowStream`].
#[derive(Debug, Clone)]
pub struct EphemeralTransaction {
    pool: SessionPool,
    bound: TimestampBound,
}

impl EphemeralTransaction {
    /// Operations on sessions from `pool`, reading at `bound`.
    #[must_use]
    pub fn new(pool: SessionPool, bound: TimestampBound) -> Self {
        Self { pool, bound }
    }

    /// Timestamp bound used by queries.
    #[must_use]
    pub fn timestamp_bound(&self) -> TimestampBound {
        self.bound
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        self.pool.clock()
    }

    /// Execute a query in a single-use read-only transaction.
    pub async fn execute_query(&self, statement: Statement, call: &CallSettings) -> Result<RowStream> {
        let mut session = acquire_session(&self.pool, TransactionMode::ReadOnly, call).await?;
        let request = ExecuteSqlRequest {
            session: session.name().clone(),
            transaction: TransactionSelector::SingleUse(TransactionOptions::ReadOnly(self.bound)),
            statement,
            seqno: 0,
        };
        let rpc = self.pool.rpc();
        let result = on_session(&mut session, call, rpc.execute_streaming_sql(request, call)).await?;
        Ok(RowStream::new(result, Some(session)))
    }

    /// Execute a DML statement in its own read-write transaction.
    pub async fn execute_dml(&self, statement: Statement, call: &CallSettings) -> Result<i64> {
        let mut session = acquire_session(&self.pool, TransactionMode::ReadWrite, call).await?;
        let request = ExecuteSqlRequest {
            session: session.name().clone(),
            transaction: TransactionSelector::Begin(TransactionOptions::ReadWrite),
            statement,
            seqno: 1,
        };
        let rpc = self.pool.rpc();
        let result = on_session(&mut session, call, rpc.execute_sql(request, call)).await?;
        let count = row_count(&result)?;
        let id = result
            .transaction
            .map(|t| t.id)
            .ok_or(Error::Protocol(ProtocolError::MissingField("transaction")))?;

        self.commit(&mut session, CommitTransaction::Id(id), Vec::new(), call)
            .await?;
        Ok(count)
    }

    /// Execute DML statements in one read-write transaction.
    ///
    /// The transaction commits only if every statement succeeds; otherwise it
    /// is rolled back and the counts of the statements that ran are reported
    /// in [`Error::BatchDml`].
    pub async fn execute_batch_dml(
        &self,
        statements: Vec<Statement>,
        call: &CallSettings,
    ) -> Result<Vec<i64>> {
        if statements.is_empty() {
            return Err(Error::InvalidArgument("batch DML needs at least one statement".into()));
        }
        let mut session = acquire_session(&self.pool, TransactionMode::ReadWrite, call).await?;
        let rpc = self.pool.rpc();
        let name = session.name().clone();
        let info = on_session(
            &mut session,
            call,
            rpc.begin_transaction(&name, &TransactionOptions::ReadWrite, call),
        )
        .await?;

        let request = ExecuteBatchDmlRequest {
            session: name.clone(),
            transaction: TransactionSelector::Id(info.id.clone()),
            statements,
            seqno: 1,
        };
        let outcome = on_session(&mut session, call, rpc.execute_batch_dml(request, call)).await;
        match outcome {
            Ok((row_counts, None)) => {
                self.commit(&mut session, CommitTransaction::Id(info.id), Vec::new(), call)
                    .await?;
                Ok(row_counts)
            }
            Ok((row_counts, Some(source))) => {
                self.rollback_quietly(&mut session, &info.id, call).await;
                Err(Error::BatchDml { row_counts, source })
            }
            Err(e) => {
                self.rollback_quietly(&mut session, &info.id, call).await;
                Err(e)
            }
        }
    }

    /// Execute a partitioned DML statement and return the lower bound of
    /// modified rows.
    pub async fn execute_partitioned_dml(
        &self,
        statement: Statement,
        call: &CallSettings,
    ) -> Result<i64> {
        let mut session = acquire_session(&self.pool, TransactionMode::PartitionedDml, call).await?;
        let rpc = self.pool.rpc();
        let name = session.name().clone();
        let info = on_session(
            &mut session,
            call,
            rpc.begin_transaction(&name, &TransactionOptions::PartitionedDml, call),
        )
        .await?;

        let request = ExecuteSqlRequest {
            session: name,
            transaction: TransactionSelector::Id(info.id),
            statement,
            seqno: 1,
        };
        let result = on_session(&mut session, call, rpc.execute_sql(request, call)).await?;
        row_count(&result)
    }

    /// Commit mutations in a single-use read-write transaction.
    pub async fn execute_mutations(
        &self,
        mutations: Vec<Mutation>,
        call: &CallSettings,
    ) -> Result<DateTime<Utc>> {
        let mut session = acquire_session(&self.pool, TransactionMode::ReadWrite, call).await?;
        self.commit(
            &mut session,
            CommitTransaction::SingleUse(TransactionOptions::ReadWrite),
            mutations,
            call,
        )
        .await
    }

    async fn commit(
        &self,
        session: &mut PooledSession,
        transaction: CommitTransaction,
        mutations: Vec<Mutation>,
        call: &CallSettings,
    ) -> Result<DateTime<Utc>> {
        let request = CommitRequest {
            session: session.name().clone(),
            transaction,
            mutations,
        };
        let response = on_session(session, call, self.pool.rpc().commit(request, call)).await?;
        Ok(response.commit_timestamp)
    }

    async fn rollback_quietly(&self, session: &mut PooledSession, id: &TransactionId, call: &CallSettings) {
        let name = session.name().clone();
        if let Err(e) = on_session(session, call, self.pool.rpc().rollback(&name, id, call)).await {
            tracing::debug!(session = %name, error = %e, "rollback after failed batch DML failed");
        }
    }
}

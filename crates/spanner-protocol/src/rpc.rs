//! Transport contract.
//!
//! The driver never speaks the wire protocol itself. It talks to the service
//! through [`SpannerRpc`], and obtains implementations of it from a
//! [`TransportFactory`] keyed by [`TransportOptions`].

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use spanner_auth::{Credentials, CredentialsProvider};

use crate::call::CallSettings;
use crate::error::RpcError;
use crate::name::{DatabaseName, SessionName};
use crate::request::{
    CommitRequest, CommitResponse, ExecuteBatchDmlRequest, ExecuteSqlRequest, SessionInfo,
};
use crate::transaction::{TransactionId, TransactionInfo, TransactionOptions};
use crate::value::{Column, ResultSet, Row};

/// Default service endpoint.
pub const DEFAULT_ENDPOINT: &str = "spanner.googleapis.com:443";

/// Streamed query result.
pub struct ResultStream {
    /// Column metadata, known before the first row arrives.
    pub columns: Vec<Column>,
    /// Transaction begun inline by the request, if any.
    pub transaction: Option<TransactionInfo>,
    /// Rows in server order.
    pub rows: BoxStream<'static, Result<Row, RpcError>>,
}

impl Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("columns", &self.columns)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

/// Request/response operations offered by the service, addressed by session
/// name.
///
/// Implementations must be safe to call concurrently. Each call receives the
/// caller's [`CallSettings`]; callers additionally wrap every call in
/// [`CallSettings::run`], so implementations may ignore them.
#[async_trait]
pub trait SpannerRpc: Debug + Send + Sync {
    /// Create one session.
    async fn create_session(
        &self,
        database: &DatabaseName,
        call: &CallSettings,
    ) -> Result<SessionInfo, RpcError>;

    /// Create up to `count` sessions. The server may return fewer.
    async fn batch_create_sessions(
        &self,
        database: &DatabaseName,
        count: usize,
        call: &CallSettings,
    ) -> Result<Vec<SessionInfo>, RpcError>;

    /// Delete a session.
    async fn delete_session(&self, session: &SessionName, call: &CallSettings)
    -> Result<(), RpcError>;

    /// Look up a session; used as a health check.
    async fn get_session(
        &self,
        session: &SessionName,
        call: &CallSettings,
    ) -> Result<SessionInfo, RpcError>;

    /// Begin a transaction on a session.
    async fn begin_transaction(
        &self,
        session: &SessionName,
        options: &TransactionOptions,
        call: &CallSettings,
    ) -> Result<TransactionInfo, RpcError>;

    /// Commit a transaction, applying any mutations.
    async fn commit(
        &self,
        request: CommitRequest,
        call: &CallSettings,
    ) -> Result<CommitResponse, RpcError>;

    /// Roll back a read-write transaction.
    async fn rollback(
        &self,
        session: &SessionName,
        transaction: &TransactionId,
        call: &CallSettings,
    ) -> Result<(), RpcError>;

    /// Execute a statement and return the full result.
    async fn execute_sql(
        &self,
        request: ExecuteSqlRequest,
        call: &CallSettings,
    ) -> Result<ResultSet, RpcError>;

    /// Execute a query and stream its rows.
    async fn execute_streaming_sql(
        &self,
        request: ExecuteSqlRequest,
        call: &CallSettings,
    ) -> Result<ResultStream, RpcError>;

    /// Execute DML statements in order; stops at the first failure.
    ///
    /// Returns the row count of each statement that ran and the error of the
    /// statement that failed, if any.
    async fn execute_batch_dml(
        &self,
        request: ExecuteBatchDmlRequest,
        call: &CallSettings,
    ) -> Result<(Vec<i64>, Option<RpcError>), RpcError>;
}

/// Client-level settings that select a distinct transport.
///
/// Two pools share a transport configuration only if these compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportOptions {
    /// `host:port` of the service.
    pub endpoint: String,
    /// Credentials presented on every call.
    pub credentials: Credentials,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: Credentials::Anonymous,
        }
    }
}

/// Creates transports for a pool.
#[async_trait]
pub trait TransportFactory: Debug + Send + Sync {
    /// Create a transport for `options`.
    ///
    /// `credentials` is the lazily-resolved token source derived from
    /// `options.credentials`, or `None` for anonymous access.
    async fn create(
        &self,
        options: &TransportOptions,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SpannerRpc>, RpcError>;
}

//! Session pool error types.

use spanner_auth::AuthError;
use spanner_protocol::{Code, RpcError};
use thiserror::Error;

/// Errors that can occur during session pool operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool has been shut down.
    #[error("session pool for {0} has been shut down")]
    Shutdown(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),

    /// A session name does not belong to the pool's database.
    #[error("session {session} does not belong to database {database}")]
    ForeignSession {
        /// The session name.
        session: String,
        /// The pool's database.
        database: String,
    },

    /// The pool could not reach its minimum size.
    #[error("session pool warm-up failed: {0}")]
    WarmupFailed(RpcError),

    /// A server call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Credentials could not be resolved.
    #[error("credentials unavailable: {0}")]
    Auth(#[from] AuthError),
}

impl PoolError {
    /// Map an RPC failure, surfacing cancellation as [`PoolError::Cancelled`].
    #[must_use]
    pub fn from_call(error: RpcError) -> Self {
        if error.code == Code::Cancelled {
            Self::Cancelled
        } else {
            Self::Rpc(error)
        }
    }

    /// Check if the error is transient and the operation may succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc(e) | Self::WarmupFailed(e) => e.code.is_retryable(),
            _ => false,
        }
    }
}

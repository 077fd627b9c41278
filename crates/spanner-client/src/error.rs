//! Client error types.

use std::time::Duration;

use spanner_auth::AuthError;
use spanner_pool::PoolError;
use spanner_protocol::{Code, ProtocolError, RpcError};
use thiserror::Error;

/// Errors returned by connections, commands and transactions.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The operation is not allowed in the current connection or
    /// transaction state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed or is incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A server call failed.
    #[error(transparent)]
    Rpc(RpcError),

    /// A batch of DML statements stopped at a failing statement.
    #[error("batch DML failed after {} statement(s): {source}", .row_counts.len())]
    BatchDml {
        /// Row counts of the statements that ran before the failure.
        row_counts: Vec<i64>,
        /// The failure of the statement that stopped the batch.
        source: RpcError,
    },

    /// Credentials could not be resolved.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The server sent something the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session pool failed in a way with no more specific mapping.
    #[error(transparent)]
    Pool(PoolError),
}

impl Error {
    /// Whether repeating the whole unit of work may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc(e) | Self::BatchDml { source: e, .. } => e.code.is_retryable(),
            Self::Pool(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the server aborted the transaction.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.code() == Some(Code::Aborted)
    }

    /// Delay the server asked for before the work is retried.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Rpc(e) | Self::BatchDml { source: e, .. } => e.retry_delay,
            _ => None,
        }
    }

    /// The status code of the underlying server failure, if any.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc(e) | Self::BatchDml { source: e, .. } => Some(e.code),
            Self::Pool(PoolError::Rpc(e) | PoolError::WarmupFailed(e)) => Some(e.code),
            Self::Cancelled => Some(Code::Cancelled),
            _ => None,
        }
    }
}

impl From<RpcError> for Error {
    fn from(error: RpcError) -> Self {
        if error.code == Code::Cancelled {
            Self::Cancelled
        } else {
            Self::Rpc(error)
        }
    }
}

impl From<PoolError> for Error {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Shutdown(database) => {
                Self::InvalidState(format!("session pool for {database} has been shut down"))
            }
            PoolError::Cancelled => Self::Cancelled,
            PoolError::Configuration(msg) => Self::Config(msg),
            PoolError::ForeignSession { .. } => Self::InvalidArgument(error.to_string()),
            PoolError::Rpc(e) => Self::from(e),
            PoolError::Auth(e) => Self::Auth(e),
            other => Self::Pool(other),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let aborted = Error::from(RpcError::aborted("conflict"));
        assert!(aborted.is_aborted());
        assert!(aborted.is_retryable());
        assert_eq!(aborted.code(), Some(Code::Aborted));

        let denied = Error::from(RpcError::new(Code::PermissionDenied, "no"));
        assert!(!denied.is_aborted());
        assert!(!denied.is_retryable());

        let batch = Error::BatchDml {
            row_counts: vec![1, 2],
            source: RpcError::aborted("conflict"),
        };
        assert!(batch.is_aborted());

        let hinted = Error::from(
            RpcError::aborted("conflict").with_retry_delay(Duration::from_millis(25)),
        );
        assert_eq!(hinted.retry_delay(), Some(Duration::from_millis(25)));

        assert!(!Error::InvalidState("closed".into()).is_retryable());
        assert_eq!(Error::InvalidState("closed".into()).code(), None);
    }

    #[test]
    fn test_cancellation_maps_to_cancelled() {
        assert!(matches!(
            Error::from(RpcError::cancelled()),
            Error::Cancelled
        ));
        assert!(matches!(
            Error::from(PoolError::Cancelled),
            Error::Cancelled
        ));
        assert_eq!(Error::Cancelled.code(), Some(Code::Cancelled));
    }

    #[test]
    fn test_pool_errors_map_to_client_errors() {
        assert!(matches!(
            Error::from(PoolError::Shutdown("db".into())),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            Error::from(PoolError::Configuration("min > max".into())),
            Error::Config(_)
        ));
        assert!(matches!(
            Error::from(PoolError::Rpc(RpcError::aborted("x"))),
            Error::Rpc(e) if e.is_aborted()
        ));
        let warmup = Error::from(PoolError::WarmupFailed(RpcError::unavailable("down")));
        assert!(matches!(warmup, Error::Pool(_)));
        assert!(warmup.is_retryable());
        assert_eq!(warmup.code(), Some(Code::Unavailable));
    }
}

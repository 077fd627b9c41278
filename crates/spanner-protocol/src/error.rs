//! Status codes and protocol-level error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Canonical status code reported by the transport for a failed call.
///
/// The numeric values match the gRPC status codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Code {
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// A requested entity (for example a session) was not found.
    NotFound = 5,
    /// The entity that a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// A quota or resource limit has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted, typically due to a transaction conflict.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal server error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Convert a raw status value into a code.
    ///
    /// Unrecognised values map to [`Code::Unknown`].
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Whether a failure with this code may succeed if the whole unit of work
    /// is attempted again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Aborted | Self::Unavailable)
    }

    /// Whether the failure is a transient transport condition that the
    /// session pool may retry by itself.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// A failed call on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Status code reported for the call.
    pub code: Code,
    /// Human-readable description from the server or the client.
    pub message: String,
    /// Delay the server asked the client to wait before retrying, if any.
    pub retry_delay: Option<Duration>,
}

impl RpcError {
    /// Create an error with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_delay: None,
        }
    }

    /// Attach a server-provided retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Transaction conflict detected by the server.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    /// Transient unavailability of the service.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Entity (usually a session) not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// The call was cancelled locally.
    pub fn cancelled() -> Self {
        Self::new(Code::Cancelled, "operation was cancelled")
    }

    /// The call ran past its deadline.
    pub fn deadline_exceeded() -> Self {
        Self::new(Code::DeadlineExceeded, "deadline exceeded")
    }

    /// Whether this is a transaction abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.code == Code::Aborted
    }

    /// Whether the session named in the call no longer exists on the server.
    #[must_use]
    pub fn is_session_not_found(&self) -> bool {
        self.code == Code::NotFound && self.message.contains("Session not found")
    }
}

/// Errors raised while interpreting protocol data on the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A resource name did not match the expected pattern.
    #[error("invalid {kind} name: {name}")]
    InvalidName {
        /// Kind of resource ("database", "session").
        kind: &'static str,
        /// The rejected input.
        name: String,
    },

    /// A transaction option combination that cannot be expressed.
    #[error("invalid transaction options: {0}")]
    InvalidTransactionOptions(String),

    /// The server response was missing a required field.
    #[error("missing {0} in server response")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_known_values() {
        for raw in 1..=16 {
            assert_eq!(Code::from_i32(raw) as i32, raw);
        }
        assert_eq!(Code::from_i32(0), Code::Unknown);
        assert_eq!(Code::from_i32(99), Code::Unknown);
    }

    #[test]
    fn test_retry_classification() {
        assert!(Code::Aborted.is_retryable());
        assert!(Code::Unavailable.is_retryable());
        assert!(!Code::DeadlineExceeded.is_retryable());
        assert!(!Code::InvalidArgument.is_retryable());

        assert!(Code::Unavailable.is_transient());
        assert!(!Code::Aborted.is_transient());
        assert!(!Code::DeadlineExceeded.is_transient());
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::aborted("transaction was aborted");
        assert_eq!(err.to_string(), "ABORTED: transaction was aborted");
        assert!(err.is_aborted());
    }

    #[test]
    fn test_session_not_found_detection() {
        let err = RpcError::not_found("Session not found: projects/p/instances/i/databases/d/sessions/s");
        assert!(err.is_session_not_found());
        assert!(!RpcError::not_found("Table not found: Users").is_session_not_found());
    }
}

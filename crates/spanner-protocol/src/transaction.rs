//! Transaction options, staleness bounds and selectors.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::ProtocolError;

/// How current the data observed by a read-only transaction must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimestampBound {
    /// Read the latest committed data.
    #[default]
    Strong,
    /// Read at exactly the given timestamp.
    ReadTimestamp(DateTime<Utc>),
    /// Read at any timestamp not older than the given one.
    ///
    /// Only valid for single-use transactions.
    MinReadTimestamp(DateTime<Utc>),
    /// Read data at most this stale.
    ///
    /// Only valid for single-use transactions.
    MaxStaleness(Duration),
    /// Read data exactly this stale.
    ExactStaleness(Duration),
}

impl TimestampBound {
    /// Whether the bound may be used by a transaction that spans several
    /// operations.
    #[must_use]
    pub fn is_multi_use_compatible(&self) -> bool {
        !matches!(self, Self::MinReadTimestamp(_) | Self::MaxStaleness(_))
    }
}

/// The mode of a transaction that is associated with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionMode {
    /// No multi-use transaction is associated with the session.
    #[default]
    None,
    /// A read-only transaction.
    ReadOnly,
    /// A locking read-write transaction.
    ReadWrite,
    /// A partitioned DML transaction.
    PartitionedDml,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
            Self::PartitionedDml => "partitioned-dml",
        })
    }
}

/// Options for beginning a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOptions {
    /// Read-only, at the given staleness bound.
    ReadOnly(TimestampBound),
    /// Locking read-write.
    ReadWrite,
    /// Partitioned DML, committed by the server.
    PartitionedDml,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::ReadOnly(TimestampBound::Strong)
    }
}

impl TransactionOptions {
    /// Strong read-only options.
    #[must_use]
    pub fn read_only() -> Self {
        Self::ReadOnly(TimestampBound::Strong)
    }

    /// The session mode tag these options produce.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        match self {
            Self::ReadOnly(_) => TransactionMode::ReadOnly,
            Self::ReadWrite => TransactionMode::ReadWrite,
            Self::PartitionedDml => TransactionMode::PartitionedDml,
        }
    }

    /// Whether the transaction can modify data.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly(_))
    }

    /// Check that the options can be used for an explicitly begun,
    /// multi-use transaction.
    pub fn validate_multi_use(&self) -> Result<(), ProtocolError> {
        match self {
            Self::ReadOnly(bound) if !bound.is_multi_use_compatible() => {
                Err(ProtocolError::InvalidTransactionOptions(format!(
                    "{bound:?} is only supported for single-use transactions"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Opaque transaction identifier assigned by the server.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(Bytes);

impl TransactionId {
    /// Wrap raw identifier bytes.
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId(")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Which transaction a request runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSelector {
    /// A temporary transaction used for this request only.
    SingleUse(TransactionOptions),
    /// Begin a new transaction as part of this request; the response
    /// carries the new transaction id.
    Begin(TransactionOptions),
    /// Run in a previously begun transaction.
    Id(TransactionId),
}

/// A transaction as returned by `BeginTransaction` or by an inline begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Server-assigned id.
    pub id: TransactionId,
    /// Read timestamp chosen for read-only transactions.
    pub read_timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_use_validation() {
        assert!(TransactionOptions::read_only().validate_multi_use().is_ok());
        assert!(TransactionOptions::ReadWrite.validate_multi_use().is_ok());
        assert!(
            TransactionOptions::ReadOnly(TimestampBound::ExactStaleness(Duration::from_secs(10)))
                .validate_multi_use()
                .is_ok()
        );
        assert!(
            TransactionOptions::ReadOnly(TimestampBound::MaxStaleness(Duration::from_secs(10)))
                .validate_multi_use()
                .is_err()
        );
        assert!(
            TransactionOptions::ReadOnly(TimestampBound::MinReadTimestamp(Utc::now()))
                .validate_multi_use()
                .is_err()
        );
    }

    #[test]
    fn test_mode_tags() {
        assert_eq!(TransactionOptions::read_only().mode(), TransactionMode::ReadOnly);
        assert_eq!(TransactionOptions::ReadWrite.mode(), TransactionMode::ReadWrite);
        assert_eq!(
            TransactionOptions::PartitionedDml.mode(),
            TransactionMode::PartitionedDml
        );
        assert_eq!(TransactionMode::PartitionedDml.to_string(), "partitioned-dml");
    }

    #[test]
    fn test_transaction_id_debug_is_hex() {
        let id = TransactionId::new(vec![0x0a, 0xff]);
        assert_eq!(format!("{id:?}"), "TransactionId(0aff)");
    }
}

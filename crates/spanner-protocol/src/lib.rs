//! # spanner-protocol
//!
//! Data model and transport contract shared by the session pool and the
//! client.
//!
//! This crate holds no connection or pooling logic. It defines what a
//! session, a transaction and a request look like, how failures are
//! classified, and the [`SpannerRpc`] trait through which the higher layers
//! reach the service.
//!
//! ## Contents
//!
//! - Resource names: [`DatabaseName`], [`SessionName`]
//! - Transactions: [`TransactionOptions`], [`TimestampBound`],
//!   [`TransactionSelector`], [`TransactionMode`]
//! - Data: [`Value`], [`Row`], [`ResultSet`], [`Mutation`], [`Statement`]
//! - Failures: [`Code`], [`RpcError`], [`ProtocolError`]
//! - Calls: [`CallSettings`] (deadline + cancellation), [`Clock`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanner_protocol::{DatabaseName, TimestampBound, TransactionOptions};
//!
//! let db: DatabaseName = "projects/p/instances/i/databases/orders".parse()?;
//! let options = TransactionOptions::ReadOnly(TimestampBound::Strong);
//! options.validate_multi_use()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod call;
pub mod clock;
pub mod error;
pub mod name;
pub mod request;
pub mod rpc;
pub mod transaction;
pub mod value;

pub use call::CallSettings;
pub use clock::{Clock, TokioClock};
pub use error::{Code, ProtocolError, RpcError};
pub use name::{DatabaseName, SessionName};
pub use request::{
    CommitRequest, CommitResponse, CommitTransaction, ExecuteBatchDmlRequest, ExecuteSqlRequest,
    Mutation, SessionInfo, Statement, Write,
};
pub use rpc::{DEFAULT_ENDPOINT, ResultStream, SpannerRpc, TransportFactory, TransportOptions};
pub use transaction::{
    TimestampBound, TransactionId, TransactionInfo, TransactionMode, TransactionOptions,
    TransactionSelector,
};
pub use value::{Column, ResultSet, ResultSetStats, Row, Value};

// Re-exported so downstream crates name one cancellation type.
pub use tokio_util::sync::CancellationToken;

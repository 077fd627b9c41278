//! # spanner-client
//!
//! Async Spanner connection with pooled sessions.
//!
//! This is the primary public API surface of the workspace. A
//! [`Connection`] takes a reference to a shared session pool when opened
//! and runs commands under one of three transaction strategies.
//!
//! ## Features
//!
//! - **Ephemeral transactions**: commands outside a transaction get a
//!   single-use or inline-begun transaction on a briefly leased session
//! - **Explicit transactions**: read-only and read-write transactions begun
//!   and completed by the caller, with buffered mutations
//! - **Retriable transactions**: units of work re-run with backoff whenever
//!   the server aborts them
//! - **Shared session pools**: connections with equal configuration share
//!   sessions through a [`SessionPoolManager`]
//! - **State notifications**: observe `Closed → Connecting → Open` transitions
//! - **OpenTelemetry**: optional metrics behind the `otel` feature
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanner_client::{CancellationToken, Config, Connection, SessionPoolManager, Statement};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "Data Source=projects/p/instances/i/databases/d;MaximumPooledSessions=50;",
//!     )?;
//!     let manager = SessionPoolManager::new(transport_factory);
//!     let connection = Connection::new(config, manager);
//!
//!     let cancel = CancellationToken::new();
//!     connection.open(&cancel).await?;
//!
//!     let rows = connection
//!         .create_command("SELECT name FROM singers")
//!         .execute_query(&cancel)
//!         .await?
//!         .collect_rows()
//!         .await?;
//!
//!     connection
//!         .run_with_retriable_transaction(&cancel, |tx| async move {
//!             let cancel = CancellationToken::new();
//!             tx.execute_dml(Statement::new("UPDATE singers SET active = true"), &cancel)
//!                 .await
//!         })
//!         .await?;
//!
//!     connection.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod instrumentation;
pub mod state;
pub mod stream;
pub mod transaction;

// Re-export commonly used types
pub use command::Command;
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use spanner_auth::Credentials;
pub use spanner_pool::{DatabaseStatistics, RetrySettings, SessionPoolManager, SessionPoolOptions};
pub use spanner_protocol::{
    CancellationToken, Column, DatabaseName, Mutation, Row, SessionName, Statement,
    TimestampBound, TransactionId, TransactionOptions, Value, Write,
};
pub use state::{ConnectionState, StateChange};
pub use stream::RowStream;
pub use transaction::{
    EphemeralTransaction, RetriableTransaction, Transaction, TransactionKind, TransactionStrategy,
};

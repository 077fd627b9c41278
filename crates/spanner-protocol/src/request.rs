//! Request and response messages exchanged with the service.

use chrono::{DateTime, Utc};

use crate::name::SessionName;
use crate::transaction::{TransactionId, TransactionOptions, TransactionSelector};
use crate::value::Value;

/// A SQL statement with named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text.
    pub sql: String,
    /// Named parameters, referenced as `@name` in the text.
    pub params: Vec<(String, Value)>,
}

impl Statement {
    /// A statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Add a named parameter.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// `ExecuteSql` / `ExecuteStreamingSql` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteSqlRequest {
    /// Session to run on.
    pub session: SessionName,
    /// Transaction to run in.
    pub transaction: TransactionSelector,
    /// The statement.
    pub statement: Statement,
    /// Sequence number, required for DML in read-write transactions so the
    /// server can deduplicate replays.
    pub seqno: i64,
}

/// `ExecuteBatchDml` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteBatchDmlRequest {
    /// Session to run on.
    pub session: SessionName,
    /// Transaction to run in.
    pub transaction: TransactionSelector,
    /// DML statements, executed in order.
    pub statements: Vec<Statement>,
    /// Sequence number.
    pub seqno: i64,
}

/// A buffered write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert rows; fails if any row already exists.
    Insert(Write),
    /// Update existing rows; fails if any row does not exist.
    Update(Write),
    /// Insert or update rows.
    InsertOrUpdate(Write),
    /// Insert or replace rows; unspecified columns become NULL.
    Replace(Write),
    /// Delete rows by primary key.
    Delete {
        /// Table name.
        table: String,
        /// Primary keys of the rows to delete.
        keys: Vec<Vec<Value>>,
    },
}

impl Mutation {
    /// Table the mutation applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert(w) | Self::Update(w) | Self::InsertOrUpdate(w) | Self::Replace(w) => {
                &w.table
            }
            Self::Delete { table, .. } => table,
        }
    }
}

/// Rows written by an insert/update/replace mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    /// Table name.
    pub table: String,
    /// Column names.
    pub columns: Vec<String>,
    /// One entry per row, in column order.
    pub values: Vec<Vec<Value>>,
}

/// How a commit identifies its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTransaction {
    /// Commit a previously begun transaction.
    Id(TransactionId),
    /// Apply the mutations in a single-use read-write transaction.
    SingleUse(TransactionOptions),
}

/// `Commit` request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    /// Session the transaction runs on.
    pub session: SessionName,
    /// Transaction to commit.
    pub transaction: CommitTransaction,
    /// Mutations applied atomically at commit.
    pub mutations: Vec<Mutation>,
}

/// `Commit` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResponse {
    /// Timestamp at which the transaction committed.
    pub commit_timestamp: DateTime<Utc>,
}

/// Session resource as returned by `CreateSession` / `GetSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Server-assigned name.
    pub name: SessionName,
    /// Creation time on the server.
    pub create_time: Option<DateTime<Utc>>,
    /// Last time the server observed activity on the session.
    pub approximate_last_use_time: Option<DateTime<Utc>>,
}

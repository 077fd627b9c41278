//! Commands: a statement or a set of mutations bound to a connection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use spanner_protocol::{CancellationToken, Mutation, Statement, TimestampBound, Value};
use tracing::Instrument;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::instrumentation::{OperationTimer, attributes, extract_operation, span_names};
use crate::stream::RowStream;
use crate::transaction::{Transaction, TransactionStrategy};

#[derive(Debug, Clone)]
enum CommandKind {
    Sql(Statement),
    Mutations(Vec<Mutation>),
}

/// A statement or set of mutations to run on a [`Connection`].
///
/// The command runs in the transaction set with
/// [`transaction`](Self::transaction), else in the connection's ambient
/// transaction, else in a transaction of its own.
///
/// # Example
///
/// ```rust,ignore
/// let rows = connection
///     .create_command("SELECT name FROM singers WHERE id = @id")
///     .bind("id", 7i64)
///     .execute_query(&cancel)
///     .await?
///     .collect_rows()
///     .await?;
/// ```
#[derive(Debug)]
pub struct Command<'a> {
    connection: &'a Connection,
    kind: CommandKind,
    timeout: Option<Duration>,
    transaction: Option<Transaction>,
    bound: TimestampBound,
}

impl<'a> Command<'a> {
    pub(crate) fn sql(connection: &'a Connection, statement: Statement) -> Self {
        Self::new(connection, CommandKind::Sql(statement))
    }

    pub(crate) fn mutations(connection: &'a Connection, mutations: Vec<Mutation>) -> Self {
        Self::new(connection, CommandKind::Mutations(mutations))
    }

    fn new(connection: &'a Connection, kind: CommandKind) -> Self {
        Self {
            connection,
            kind,
            timeout: None,
            transaction: None,
            bound: TimestampBound::Strong,
        }
    }

    /// Bind a named parameter.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kind = match self.kind {
            CommandKind::Sql(statement) => CommandKind::Sql(statement.bind(name, value)),
            other => other,
        };
        self
    }

    /// Deadline for each call the command makes, instead of the connection's
    /// command timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run in `transaction`.
    #[must_use]
    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    /// Staleness of a query run outside a transaction.
    #[must_use]
    pub fn timestamp_bound(mut self, bound: TimestampBound) -> Self {
        self.bound = bound;
        self
    }

    /// Execute a query and stream its rows.
    pub async fn execute_query(self, cancel: &CancellationToken) -> Result<RowStream> {
        let statement = self.statement()?;
        let (strategy, timer, span) = self.prepare(span_names::QUERY, &statement)?;
        let call = self.connection.call_settings(&strategy, cancel, self.timeout);
        let result = strategy
            .execute_query(statement, &call)
            .instrument(span)
            .await;
        timer.finish(self.connection.metrics(), result.is_ok());
        result
    }

    /// Execute a DML statement and return the modified row count.
    pub async fn execute_dml(self, cancel: &CancellationToken) -> Result<i64> {
        let statement = self.statement()?;
        let (strategy, timer, span) = self.prepare(span_names::EXECUTE, &statement)?;
        let call = self.connection.call_settings(&strategy, cancel, self.timeout);
        let result = strategy
            .execute_dml(statement, &call)
            .instrument(span.clone())
            .await;
        if let Ok(rows) = &result {
            span.record(attributes::DB_ROWS_AFFECTED, *rows);
        }
        timer.finish(self.connection.metrics(), result.is_ok());
        result
    }

    /// Execute a partitioned DML statement and return the lower bound of
    /// modified rows.
    ///
    /// Fails with [`Error::InvalidState`] inside a transaction.
    pub async fn execute_partitioned_dml(self, cancel: &CancellationToken) -> Result<i64> {
        let statement = self.statement()?;
        let (strategy, timer, span) = self.prepare(span_names::PARTITIONED_DML, &statement)?;
        let call = self.connection.call_settings(&strategy, cancel, self.timeout);
        let result = strategy
            .execute_partitioned_dml(statement, &call)
            .instrument(span)
            .await;
        timer.finish(self.connection.metrics(), result.is_ok());
        result
    }

    /// Write the command's mutations.
    ///
    /// Outside a transaction they commit at once and the commit timestamp
    /// is returned; inside one they are buffered until it commits.
    pub async fn execute_mutations(
        self,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>> {
        let CommandKind::Mutations(mutations) = self.kind else {
            return Err(Error::InvalidState("command has no mutations".into()));
        };
        let strategy = self
            .connection
            .strategy(self.transaction.as_ref(), self.bound)?;
        let span = tracing::debug_span!(
            span_names::MUTATIONS,
            count = mutations.len(),
            strategy = strategy.name()
        );
        let timer = OperationTimer::start("MUTATE");
        let call = self.connection.call_settings(&strategy, cancel, self.timeout);
        let result = strategy
            .execute_mutations(mutations, &call)
            .instrument(span)
            .await;
        timer.finish(self.connection.metrics(), result.is_ok());
        result
    }

    fn statement(&self) -> Result<Statement> {
        match &self.kind {
            CommandKind::Sql(statement) => Ok(statement.clone()),
            CommandKind::Mutations(_) => Err(Error::InvalidState(
                "a mutation command cannot be executed as SQL".into(),
            )),
        }
    }

    fn prepare(
        &self,
        name: &'static str,
        statement: &Statement,
    ) -> Result<(TransactionStrategy, OperationTimer, tracing::Span)> {
        let strategy = self
            .connection
            .strategy(self.transaction.as_ref(), self.bound)?;
        let operation = extract_operation(&statement.sql);
        let span = match name {
            span_names::QUERY => tracing::debug_span!(
                span_names::QUERY,
                { attributes::DB_STATEMENT } = %self.connection.sanitization().sanitize(&statement.sql),
                { attributes::DB_OPERATION } = operation,
                strategy = strategy.name(),
            ),
            span_names::PARTITIONED_DML => tracing::debug_span!(
                span_names::PARTITIONED_DML,
                { attributes::DB_STATEMENT } = %self.connection.sanitization().sanitize(&statement.sql),
                { attributes::DB_OPERATION } = operation,
                strategy = strategy.name(),
            ),
            _ => tracing::debug_span!(
                span_names::EXECUTE,
                { attributes::DB_STATEMENT } = %self.connection.sanitization().sanitize(&statement.sql),
                { attributes::DB_OPERATION } = operation,
                { attributes::DB_ROWS_AFFECTED } = tracing::field::Empty,
                strategy = strategy.name(),
            ),
        };
        Ok((strategy, OperationTimer::start(operation), span))
    }
}

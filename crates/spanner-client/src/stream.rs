//! Streamed query results.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use spanner_pool::PooledSession;
use spanner_protocol::{Column, ResultStream, Row, RpcError};

use crate::error::{Error, Result};

/// Rows of a query, yielded as the server sends them.
///
/// A stream produced outside a transaction owns its session; the session
/// returns to the pool when the stream is exhausted, fails or is dropped.
pub struct RowStream {
    columns: Vec<Column>,
    read_timestamp: Option<DateTime<Utc>>,
    rows: BoxStream<'static, std::result::Result<Row, RpcError>>,
    session: Option<PooledSession>,
}

impl RowStream {
    pub(crate) fn new(result: ResultStream, session: Option<PooledSession>) -> Self {
        Self {
            columns: result.columns,
            read_timestamp: result.transaction.and_then(|t| t.read_timestamp),
            rows: result.rows,
            session,
        }
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Timestamp the rows were read at, when the server reported one.
    #[must_use]
    pub fn read_timestamp(&self) -> Option<DateTime<Utc>> {
        self.read_timestamp
    }

    /// Whether the stream still holds a pooled session.
    #[must_use]
    pub fn holds_session(&self) -> bool {
        self.session.is_some()
    }

    /// Read every remaining row.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.rows.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(Ok(row))),
            Poll::Ready(Some(Err(e))) => {
                if let Some(mut session) = this.session.take() {
                    if e.is_session_not_found() {
                        session.mark_unhealthy();
                    }
                }
                Poll::Ready(Some(Err(Error::from(e))))
            }
            Poll::Ready(None) => {
                // Exhausted: the session is free for reuse.
                this.session = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("read_timestamp", &self.read_timestamp)
            .field("session", &self.session.as_ref().map(PooledSession::name))
            .finish_non_exhaustive()
    }
}

//! Read-write transactions that are re-run when the server aborts them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use spanner_pool::{Backoff, RetrySettings, SessionPool};
use spanner_protocol::{CallSettings, CancellationToken, TransactionOptions};
use tracing::Instrument;

use super::{Transaction, TransactionKind};
use crate::error::{Error, Result};
use crate::instrumentation::{DatabaseMetrics, attributes, span_names};

/// Runs a unit of work in a read-write transaction, retrying it from the
/// start whenever the transaction is aborted.
///
/// Each attempt gets a fresh [`Transaction`]. The work commits nothing
/// itself: when it returns `Ok` the transaction is committed, and if that
/// commit is aborted the whole unit runs again. Any error other than an
/// abort rolls the attempt back and is returned unchanged.
///
/// # Example
///
/// ```rust,ignore
/// let total = connection
///     .run_with_retriable_transaction(&cancel, |tx| async move {
///         let cancel = CancellationToken::new();
///         let rows = tx.execute_dml(Statement::new("UPDATE t SET n = n + 1"), &cancel).await?;
///         Ok(rows)
///     })
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct RetriableTransaction {
    pool: SessionPool,
    settings: RetrySettings,
    command_timeout: Option<Duration>,
    metrics: Option<Arc<DatabaseMetrics>>,
}

enum Attempt<T> {
    Committed(T),
    Aborted(Error),
    Failed(Error),
}

impl RetriableTransaction {
    /// Retry loop over sessions from `pool`.
    #[must_use]
    pub fn new(pool: SessionPool, settings: RetrySettings) -> Self {
        Self {
            pool,
            settings,
            command_timeout: None,
            metrics: None,
        }
    }

    /// Deadline for each call made by an attempt.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Record retries in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<DatabaseMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Retry bounds in use.
    #[must_use]
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Run `work` until it commits, fails with a non-abort error, or the
    /// retry bounds are exhausted.
    ///
    /// On exhaustion the last abort error is returned. Cancelling `cancel`
    /// stops the loop before the next attempt or during a backoff sleep.
    pub async fn run<T, F, Fut>(&self, mut work: F, cancel: &CancellationToken) -> Result<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let span = tracing::debug_span!(
            span_names::RETRIABLE_TRANSACTION,
            { attributes::DB_ATTEMPT } = tracing::field::Empty
        );
        let clock = Arc::clone(self.pool.clock());
        let mut backoff = Backoff::new(&self.settings, clock.now());

        async {
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                backoff.record_attempt();
                tracing::Span::current().record(attributes::DB_ATTEMPT, backoff.attempts());

                let error = match self.attempt(&mut work, cancel).await {
                    Attempt::Committed(value) => return Ok(value),
                    Attempt::Failed(e) => return Err(e),
                    Attempt::Aborted(e) => e,
                };

                let Some(delay) = backoff.next_delay(clock.now(), error.retry_delay()) else {
                    tracing::debug!(attempts = backoff.attempts(), "retries exhausted");
                    return Err(error);
                };
                tracing::debug!(
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "transaction aborted, retrying"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_transaction_retry();
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = clock.sleep(delay) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt<T, F, Fut>(&self, work: &mut F, cancel: &CancellationToken) -> Attempt<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call = CallSettings::new(cancel.clone())
            .with_timeout(self.pool.clock(), self.command_timeout);
        let transaction = match Transaction::begin(
            &self.pool,
            TransactionOptions::ReadWrite,
            TransactionKind::Retriable,
            self.command_timeout,
            &call,
        )
        .await
        {
            Ok(t) => t,
            Err(e) if e.is_aborted() => return Attempt::Aborted(e),
            Err(e) => return Attempt::Failed(e),
        };

        match work(transaction.clone()).await {
            Ok(value) => {
                let call = CallSettings::new(cancel.clone())
                    .with_timeout(self.pool.clock(), self.command_timeout);
                match transaction.commit_with(&call).await {
                    Ok(_) => Attempt::Committed(value),
                    Err(e) if e.is_aborted() => Attempt::Aborted(e),
                    Err(e) => Attempt::Failed(e),
                }
            }
            Err(e) if e.is_aborted() => {
                transaction.discard().await;
                Attempt::Aborted(e)
            }
            Err(e) => {
                if !transaction.is_completed() {
                    let call = CallSettings::new(CancellationToken::new())
                        .with_timeout(self.pool.clock(), self.command_timeout);
                    if let Err(rollback) = transaction.rollback_with(&call).await {
                        tracing::debug!(error = %rollback, "rollback of failed attempt failed");
                    }
                }
                Attempt::Failed(e)
            }
        }
    }
}

//! Per-call deadline and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, TokioClock};
use crate::error::RpcError;

/// Deadline and cancellation applied to a single call.
///
/// Every suspending operation in the driver receives one of these. The
/// deadline comes from the command or connection timeout; cancellation comes
/// from the caller. Deadlines are measured on the settings' [`Clock`], the
/// tokio timer unless one is supplied.
#[derive(Debug, Clone, Default)]
pub struct CallSettings {
    deadline: Option<Instant>,
    clock: Option<Arc<dyn Clock>>,
    cancellation: CancellationToken,
}

impl CallSettings {
    /// Settings with no deadline and the given cancellation token.
    #[must_use]
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            deadline: None,
            clock: None,
            cancellation,
        }
    }

    /// Measure the deadline on `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline `timeout` from now on `clock`, which also becomes the
    /// clock the deadline is enforced with. `None` leaves the call unbounded.
    #[must_use]
    pub fn with_timeout(mut self, clock: &Arc<dyn Clock>, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| clock.now() + t);
        self.clock = Some(Arc::clone(clock));
        self
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Drive `call` to completion, failing with `CANCELLED` or
    /// `DEADLINE_EXCEEDED` if either fires first.
    pub async fn run<T, F>(&self, call: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(RpcError::cancelled());
        }

        let bounded = async {
            let Some(deadline) = self.deadline else {
                return call.await;
            };
            let clock: &dyn Clock = self.clock.as_deref().unwrap_or(&TokioClock);
            let expiry = clock.sleep(deadline.saturating_duration_since(clock.now()));
            tokio::select! {
                biased;
                result = call => result,
                () = expiry => Err(RpcError::deadline_exceeded()),
            }
        };

        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(RpcError::cancelled()),
            result = bounded => result,
        }
    }
}

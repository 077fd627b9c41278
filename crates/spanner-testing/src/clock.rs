//! A clock that records the delays it is asked for.

use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use spanner_protocol::Clock;
use tokio::time::Instant;

/// [`Clock`] backed by the tokio timer that records every sleep.
///
/// Combine with a paused runtime (`#[tokio::test(start_paused = true)]`) so
/// sleeps complete instantly while their durations stay observable.
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    /// Create a clock with no recorded sleeps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Sleeps requested so far that are shorter than `limit`.
    ///
    /// Useful to separate retry backoff from long maintenance periods.
    #[must_use]
    pub fn sleeps_shorter_than(&self, limit: Duration) -> Vec<Duration> {
        self.sleeps
            .lock()
            .iter()
            .copied()
            .filter(|d| *d < limit)
            .collect()
    }
}

impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_records_sleeps() {
        let clock = RecordingClock::new();
        clock.sleep(Duration::from_millis(5)).await;
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(5), Duration::from_secs(30)]
        );
        assert_eq!(
            clock.sleeps_shorter_than(Duration::from_secs(1)),
            vec![Duration::from_millis(5)]
        );
    }
}

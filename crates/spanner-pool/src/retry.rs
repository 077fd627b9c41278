//! Retry settings and exponential backoff.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Bounds for a retry loop.
///
/// Used by the pool for transient session-creation failures and by the
/// client for retriable transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first. `None` means the
    /// loop is bounded only by `timeout`.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
    /// Factor applied to the delay after every retry.
    pub multiplier: u32,
    /// Randomise each delay between half and all of its nominal value.
    pub jitter: bool,
    /// Overall time budget measured from the first attempt.
    pub timeout: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
            jitter: true,
            timeout: None,
        }
    }
}

impl RetrySettings {
    /// Set the attempt limit.
    #[must_use]
    pub fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the first and maximum delay.
    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Set the overall time budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// State of one retry loop.
#[derive(Debug)]
pub struct Backoff {
    settings: RetrySettings,
    next: Duration,
    attempts: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    /// Start a loop at `now`.
    #[must_use]
    pub fn new(settings: &RetrySettings, now: Instant) -> Self {
        Self {
            next: settings.initial_backoff,
            attempts: 0,
            deadline: settings.timeout.map(|t| now + t),
            settings: settings.clone(),
        }
    }

    /// Record that an attempt is about to run.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` if the loop is exhausted.
    ///
    /// A server-provided delay is honoured when it is longer than the
    /// computed one.
    pub fn next_delay(&mut self, now: Instant, server_hint: Option<Duration>) -> Option<Duration> {
        if self
            .settings
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }

        let nominal = self.next;
        self.next = nominal
            .saturating_mul(self.settings.multiplier.max(1))
            .min(self.settings.max_backoff);

        let mut delay = if self.settings.jitter {
            let full = nominal.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(full / 2..=full))
        } else {
            nominal
        };
        if let Some(hint) = server_hint {
            delay = delay.max(hint);
        }

        match self.deadline {
            Some(deadline) if now + delay >= deadline => None,
            _ => Some(delay),
        }
    }
}

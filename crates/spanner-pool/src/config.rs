//! Session pool configuration.

use std::time::Duration;

use crate::error::PoolError;
use crate::retry::RetrySettings;

/// Configuration for a [`SessionPool`](crate::SessionPool).
///
/// Options take part in the [`SessionPoolKey`](crate::SessionPoolKey), so
/// connections with different options never share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionPoolOptions {
    /// Sessions the pool keeps warm. Eviction never drops below this.
    pub min_sessions: u32,
    /// Upper bound on sessions the pool holds at once, idle or in use.
    pub max_sessions: u32,
    /// Idle sessions unused for this long are deleted, down to `min_sessions`.
    pub idle_eviction_delay: Duration,
    /// Idle sessions not verified for this long are pinged by maintenance.
    pub health_check_interval: Duration,
    /// Period of the background maintenance loop.
    pub maintenance_interval: Duration,
    /// Maximum number of sessions pinged per maintenance pass.
    pub health_check_batch_size: u32,
    /// Retry policy for transient session-creation failures.
    pub creation_retry: RetrySettings,
}

impl Default for SessionPoolOptions {
    fn default() -> Self {
        Self {
            min_sessions: 100,
            max_sessions: 400,
            idle_eviction_delay: Duration::from_secs(30 * 60),
            health_check_interval: Duration::from_secs(15 * 60),
            maintenance_interval: Duration::from_secs(30),
            health_check_batch_size: 10,
            creation_retry: RetrySettings::default(),
        }
    }
}

impl SessionPoolOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of pooled sessions.
    #[must_use]
    pub fn min_sessions(mut self, count: u32) -> Self {
        self.min_sessions = count;
        self
    }

    /// Set the maximum number of sessions.
    #[must_use]
    pub fn max_sessions(mut self, count: u32) -> Self {
        self.max_sessions = count;
        self
    }

    /// Set the idle eviction delay.
    #[must_use]
    pub fn idle_eviction_delay(mut self, delay: Duration) -> Self {
        self.idle_eviction_delay = delay;
        self
    }

    /// Set the health check interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the maintenance loop period.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set how many sessions a maintenance pass may ping.
    #[must_use]
    pub fn health_check_batch_size(mut self, size: u32) -> Self {
        self.health_check_batch_size = size;
        self
    }

    /// Set the session-creation retry policy.
    #[must_use]
    pub fn creation_retry(mut self, retry: RetrySettings) -> Self {
        self.creation_retry = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_sessions == 0 {
            return Err(PoolError::Configuration(
                "max_sessions must be greater than 0".into(),
            ));
        }

        if self.min_sessions > self.max_sessions {
            return Err(PoolError::Configuration(
                "min_sessions cannot exceed max_sessions".into(),
            ));
        }

        if self.maintenance_interval.is_zero() {
            return Err(PoolError::Configuration(
                "maintenance_interval must be greater than 0".into(),
            ));
        }

        if self.health_check_batch_size == 0 {
            return Err(PoolError::Configuration(
                "health_check_batch_size must be greater than 0".into(),
            ));
        }

        if self.creation_retry.multiplier == 0 {
            return Err(PoolError::Configuration(
                "creation_retry.multiplier must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SessionPoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_min_exceeds_max() {
        let options = SessionPoolOptions::new().min_sessions(10).max_sessions(5);
        assert!(matches!(
            options.validate(),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_max() {
        let options = SessionPoolOptions::new().min_sessions(0).max_sessions(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_maintenance_interval() {
        let options = SessionPoolOptions::new().maintenance_interval(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_compare_by_value() {
        let a = SessionPoolOptions::new().max_sessions(7);
        let b = SessionPoolOptions::new().max_sessions(7);
        assert_eq!(a, b);
        assert_ne!(a, SessionPoolOptions::new());
    }
}

//! Connection configuration.

use std::time::Duration;

use spanner_auth::Credentials;
use spanner_pool::{RetrySettings, SessionPoolKey, SessionPoolOptions};
use spanner_protocol::{DatabaseName, TransportOptions};

use crate::error::Error;

/// Configuration for a [`Connection`](crate::Connection).
///
/// Everything except the timeouts and the retry settings takes part in
/// choosing the session pool, so connections built from equal
/// configurations share sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database sessions are created in.
    pub database: Option<DatabaseName>,

    /// Service hostname.
    pub host: String,

    /// Service port (default: 443).
    pub port: u16,

    /// Authentication credentials.
    pub credentials: Credentials,

    /// Session pool sizing and maintenance.
    pub pool: SessionPoolOptions,

    /// Time allowed for opening the connection.
    pub connect_timeout: Duration,

    /// Deadline applied to every call of a command. `None` waits forever.
    pub command_timeout: Option<Duration>,

    /// Bounds for retriable transactions.
    pub transaction_retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            host: "spanner.googleapis.com".to_string(),
            port: 443,
            credentials: Credentials::Anonymous,
            pool: SessionPoolOptions::default(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Some(Duration::from_secs(30)),
            transaction_retry: RetrySettings::default()
                .max_attempts(None)
                .timeout(Some(Duration::from_secs(60))),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Keys are case-insensitive; durations are whole seconds:
    /// ```text
    /// Data Source=projects/p/instances/i/databases/d;Host=localhost;Port=9010;
    /// MinimumPooledSessions=10;MaximumPooledSessions=100;Timeout=60;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "data source" | "database" => {
                    config.database = Some(value.parse().map_err(|e| {
                        Error::Config(format!("invalid data source: {e}"))
                    })?);
                }
                "host" => {
                    config.host = value.to_string();
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "minimumpooledsessions" => {
                    config.pool.min_sessions = parse_count(&key, value)?;
                }
                "maximumpooledsessions" => {
                    config.pool.max_sessions = parse_count(&key, value)?;
                }
                "idlesessionevictiondelay" => {
                    config.pool.idle_eviction_delay = parse_seconds(&key, value)?;
                }
                "sessionhealthcheckinterval" => {
                    config.pool.health_check_interval = parse_seconds(&key, value)?;
                }
                "maintenanceloopdelay" => {
                    config.pool.maintenance_interval = parse_seconds(&key, value)?;
                }
                "timeout" | "command timeout" => {
                    // Zero means no deadline.
                    let timeout = parse_seconds(&key, value)?;
                    config.command_timeout = (!timeout.is_zero()).then_some(timeout);
                }
                "connection timeout" | "connect timeout" => {
                    config.connect_timeout = parse_seconds(&key, value)?;
                }
                "maximumretryattempts" => {
                    let attempts = parse_count(&key, value)?;
                    config.transaction_retry.max_attempts = (attempts > 0).then_some(attempts);
                }
                "retrytimeout" => {
                    let timeout = parse_seconds(&key, value)?;
                    config.transaction_retry.timeout = (!timeout.is_zero()).then_some(timeout);
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        Ok(config)
    }

    /// Set the database.
    #[must_use]
    pub fn database(mut self, database: DatabaseName) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the service host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the service port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the session pool options.
    #[must_use]
    pub fn pool_options(mut self, options: SessionPoolOptions) -> Self {
        self.pool = options;
        self
    }

    /// Set the minimum number of pooled sessions.
    #[must_use]
    pub fn min_sessions(mut self, count: u32) -> Self {
        self.pool.min_sessions = count;
        self
    }

    /// Set the maximum number of pooled sessions.
    #[must_use]
    pub fn max_sessions(mut self, count: u32) -> Self {
        self.pool.max_sessions = count;
        self
    }

    /// Set the idle session eviction delay.
    #[must_use]
    pub fn idle_eviction_delay(mut self, delay: Duration) -> Self {
        self.pool.idle_eviction_delay = delay;
        self
    }

    /// Set the session health-check interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.pool.health_check_interval = interval;
        self
    }

    /// Set the delay between pool maintenance passes.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.pool.maintenance_interval = interval;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry bounds for retriable transactions.
    #[must_use]
    pub fn transaction_retry(mut self, retry: RetrySettings) -> Self {
        self.transaction_retry = retry;
        self
    }

    /// The `host:port` endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Transport settings derived from this configuration.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            endpoint: self.endpoint(),
            credentials: self.credentials.clone(),
        }
    }

    /// The key of the session pool this configuration uses.
    pub fn pool_key(&self) -> Result<SessionPoolKey, Error> {
        let database = self
            .database
            .clone()
            .ok_or_else(|| Error::Config("no data source configured".into()))?;
        Ok(SessionPoolKey::new(
            database,
            self.transport_options(),
            self.pool.clone(),
        ))
    }
}

fn parse_count(key: &str, value: &str) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, Error> {
    value
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DB: &str = "projects/p/instances/i/databases/d";

    #[test]
    fn test_connection_string_parsing() {
        let config = Config::from_connection_string(&format!(
            "Data Source={DB};Host=localhost;Port=9010;"
        ))
        .unwrap();

        assert_eq!(config.database.unwrap().to_string(), DB);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9010);
    }

    #[test]
    fn test_pool_and_timeout_keys() {
        let config = Config::from_connection_string(
            "MinimumPooledSessions=5;maximumpooledsessions=50;IdleSessionEvictionDelay=600;\
             SessionHealthCheckInterval=120;MaintenanceLoopDelay=10;Timeout=0;\
             Connection Timeout=5;MaximumRetryAttempts=7;RetryTimeout=20",
        )
        .unwrap();

        assert_eq!(config.pool.min_sessions, 5);
        assert_eq!(config.pool.max_sessions, 50);
        assert_eq!(config.pool.idle_eviction_delay, Duration::from_secs(600));
        assert_eq!(config.pool.health_check_interval, Duration::from_secs(120));
        assert_eq!(config.pool.maintenance_interval, Duration::from_secs(10));
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.transaction_retry.max_attempts, Some(7));
        assert_eq!(
            config.transaction_retry.timeout,
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = Config::from_connection_string("Foo=bar;Port=1234").unwrap();
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_connection_string("Port=abc"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_connection_string("Data Source=orders"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_connection_string("Host"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_pool_key_requires_database() {
        assert!(matches!(Config::new().pool_key(), Err(Error::Config(_))));

        let config = Config::new()
            .database(DB.parse().unwrap())
            .host("localhost")
            .port(9010)
            .max_sessions(20);
        let key = config.pool_key().unwrap();
        assert_eq!(key.transport.endpoint, "localhost:9010");
        assert_eq!(key.options.max_sessions, 20);
    }

    #[test]
    fn test_timeouts_do_not_change_the_pool_key() {
        let base = Config::new().database(DB.parse().unwrap());
        let slower = base
            .clone()
            .command_timeout(Some(Duration::from_secs(600)))
            .connect_timeout(Duration::from_secs(1));
        assert_eq!(base.pool_key().unwrap(), slower.pool_key().unwrap());
    }
}

//! Tracing and OpenTelemetry instrumentation.
//!
//! Operations emit `tracing` spans named after [`span_names`] and carrying
//! the [`attributes`] keys, so a `tracing-opentelemetry` layer exports them
//! as OpenTelemetry spans. With the `otel` feature enabled,
//! [`DatabaseMetrics`] additionally records session pool gauges and
//! operation histograms through the global meter provider; without it the
//! same type is a no-op.
//!
//! ## Semantic Conventions
//!
//! Follows OpenTelemetry database semantic conventions:
//! - `db.system`: "spanner"
//! - `db.name`: Database name
//! - `db.statement`: SQL statement (sanitized if configured)
//! - `db.operation`: Statement kind (SELECT, INSERT, etc.)
//! - `server.address`: Service endpoint

/// Database system identifier.
pub const DB_SYSTEM: &str = "spanner";

/// Span names for database operations.
pub mod span_names {
    /// Span name for opening a connection.
    pub const CONNECT: &str = "spanner.connect";
    /// Span name for query execution.
    pub const QUERY: &str = "spanner.query";
    /// Span name for DML execution.
    pub const EXECUTE: &str = "spanner.execute";
    /// Span name for partitioned DML execution.
    pub const PARTITIONED_DML: &str = "spanner.partitioned_dml";
    /// Span name for batch DML execution.
    pub const BATCH_DML: &str = "spanner.batch_dml";
    /// Span name for writing mutations.
    pub const MUTATIONS: &str = "spanner.mutations";
    /// Span name for beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "spanner.begin_transaction";
    /// Span name for committing a transaction.
    pub const COMMIT: &str = "spanner.commit";
    /// Span name for rolling back a transaction.
    pub const ROLLBACK: &str = "spanner.rollback";
    /// Span name for a retriable transaction, covering every attempt.
    pub const RETRIABLE_TRANSACTION: &str = "spanner.retriable_transaction";
}

/// Attribute keys following OpenTelemetry semantic conventions.
pub mod attributes {
    /// Database system type.
    pub const DB_SYSTEM: &str = "db.system";
    /// Database name.
    pub const DB_NAME: &str = "db.name";
    /// SQL statement (may be sanitized).
    pub const DB_STATEMENT: &str = "db.statement";
    /// Database operation type.
    pub const DB_OPERATION: &str = "db.operation";
    /// Service endpoint.
    pub const SERVER_ADDRESS: &str = "server.address";
    /// Number of rows affected.
    pub const DB_ROWS_AFFECTED: &str = "db.rows_affected";
    /// Session the operation ran on.
    pub const DB_SESSION: &str = "db.spanner.session";
    /// Attempt number within a retriable transaction.
    pub const DB_ATTEMPT: &str = "db.spanner.attempt";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }
        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace string and numeric literals with placeholders.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
                result.push_str(placeholder);
            }
            continue;
        }

        // Backticks quote identifiers, not values.
        if c == '\'' || c == '"' {
            quote = Some(c);
            continue;
        }

        if c.is_ascii_digit() && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_') {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if quote.is_some() {
        result.push_str(placeholder);
    }

    result
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match head.as_str() {
        "SELECT" | "WITH" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "CALL" => "CALL",
        "CREATE" => "CREATE",
        "ALTER" => "ALTER",
        "DROP" => "DROP",
        _ => "OTHER",
    }
}

// =============================================================================
// OpenTelemetry Metrics Support
// =============================================================================

/// Metric names following OpenTelemetry semantic conventions.
pub mod metric_names {
    /// Gauge: Number of sessions currently checked out.
    pub const DB_CLIENT_SESSIONS_USAGE: &str = "db.client.sessions.usage";
    /// Gauge: Number of idle sessions in the pool.
    pub const DB_CLIENT_SESSIONS_IDLE: &str = "db.client.sessions.idle";
    /// Gauge: Maximum sessions allowed in the pool.
    pub const DB_CLIENT_SESSIONS_MAX: &str = "db.client.sessions.max";
    /// Gauge: Callers waiting for a session.
    pub const DB_CLIENT_SESSIONS_PENDING: &str = "db.client.sessions.pending_requests";
    /// Histogram: Duration of database operations.
    pub const DB_CLIENT_OPERATION_DURATION: &str = "db.client.operation.duration";
    /// Counter: Total number of operations performed.
    pub const DB_CLIENT_OPERATIONS_TOTAL: &str = "db.client.operations.total";
    /// Counter: Total number of operation errors.
    pub const DB_CLIENT_ERRORS_TOTAL: &str = "db.client.errors.total";
    /// Counter: Retriable transaction attempts repeated after an abort.
    pub const DB_CLIENT_TRANSACTION_RETRIES: &str = "db.client.transaction.retries";
}

/// Session pool and operation metrics recorded through OpenTelemetry.
#[cfg(feature = "otel")]
pub struct DatabaseMetrics {
    sessions_usage: opentelemetry::metrics::Gauge<u64>,
    sessions_idle: opentelemetry::metrics::Gauge<u64>,
    sessions_max: opentelemetry::metrics::Gauge<u64>,
    sessions_pending: opentelemetry::metrics::Gauge<u64>,
    operation_duration: opentelemetry::metrics::Histogram<f64>,
    operations_total: opentelemetry::metrics::Counter<u64>,
    errors_total: opentelemetry::metrics::Counter<u64>,
    transaction_retries: opentelemetry::metrics::Counter<u64>,
    base_attributes: Vec<opentelemetry::KeyValue>,
}

#[cfg(feature = "otel")]
impl DatabaseMetrics {
    /// Create a metrics collector for one database on one endpoint.
    pub fn new(database: &str, server_address: &str) -> Self {
        use opentelemetry::{KeyValue, global};

        let meter = global::meter("spanner-client");

        let sessions_usage = meter
            .u64_gauge(metric_names::DB_CLIENT_SESSIONS_USAGE)
            .with_description("Number of sessions currently checked out")
            .with_unit("sessions")
            .build();

        let sessions_idle = meter
            .u64_gauge(metric_names::DB_CLIENT_SESSIONS_IDLE)
            .with_description("Number of idle sessions available")
            .with_unit("sessions")
            .build();

        let sessions_max = meter
            .u64_gauge(metric_names::DB_CLIENT_SESSIONS_MAX)
            .with_description("Maximum number of sessions allowed")
            .with_unit("sessions")
            .build();

        let sessions_pending = meter
            .u64_gauge(metric_names::DB_CLIENT_SESSIONS_PENDING)
            .with_description("Number of callers waiting for a session")
            .with_unit("requests")
            .build();

        let operation_duration = meter
            .f64_histogram(metric_names::DB_CLIENT_OPERATION_DURATION)
            .with_description("Duration of database operations")
            .with_unit("s")
            .build();

        let operations_total = meter
            .u64_counter(metric_names::DB_CLIENT_OPERATIONS_TOTAL)
            .with_description("Total number of database operations")
            .with_unit("operations")
            .build();

        let errors_total = meter
            .u64_counter(metric_names::DB_CLIENT_ERRORS_TOTAL)
            .with_description("Total number of operation errors")
            .with_unit("errors")
            .build();

        let transaction_retries = meter
            .u64_counter(metric_names::DB_CLIENT_TRANSACTION_RETRIES)
            .with_description("Retriable transaction attempts repeated after an abort")
            .with_unit("attempts")
            .build();

        let base_attributes = vec![
            KeyValue::new(attributes::DB_SYSTEM, DB_SYSTEM),
            KeyValue::new(attributes::DB_NAME, database.to_string()),
            KeyValue::new(attributes::SERVER_ADDRESS, server_address.to_string()),
        ];

        Self {
            sessions_usage,
            sessions_idle,
            sessions_max,
            sessions_pending,
            operation_duration,
            operations_total,
            errors_total,
            transaction_retries,
            base_attributes,
        }
    }

    /// Record session pool status.
    pub fn record_pool_status(&self, in_use: u64, idle: u64, max: u64, pending: u64) {
        self.sessions_usage.record(in_use, &self.base_attributes);
        self.sessions_idle.record(idle, &self.base_attributes);
        self.sessions_max.record(max, &self.base_attributes);
        self.sessions_pending.record(pending, &self.base_attributes);
    }

    /// Record an operation duration.
    pub fn record_operation(&self, operation: &str, duration_seconds: f64, success: bool) {
        use opentelemetry::KeyValue;

        let mut attrs = self.base_attributes.clone();
        attrs.push(KeyValue::new(
            attributes::DB_OPERATION,
            operation.to_string(),
        ));
        attrs.push(KeyValue::new("db.operation.success", success));

        self.operations_total.add(1, &attrs);
        self.operation_duration.record(duration_seconds, &attrs);

        if !success {
            self.errors_total.add(1, &attrs);
        }
    }

    /// Record a retriable transaction attempt that was aborted and repeated.
    pub fn record_transaction_retry(&self) {
        self.transaction_retries.add(1, &self.base_attributes);
    }
}

#[cfg(feature = "otel")]
impl std::fmt::Debug for DatabaseMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseMetrics")
            .field("attributes", &self.base_attributes)
            .finish_non_exhaustive()
    }
}

/// No-op metrics collector when the `otel` feature is disabled.
#[cfg(not(feature = "otel"))]
#[derive(Debug, Clone, Default)]
pub struct DatabaseMetrics;

#[cfg(not(feature = "otel"))]
impl DatabaseMetrics {
    /// Create a new no-op metrics collector.
    #[must_use]
    pub fn new(_database: &str, _server_address: &str) -> Self {
        Self
    }

    /// Record session pool status (no-op).
    pub fn record_pool_status(&self, _in_use: u64, _idle: u64, _max: u64, _pending: u64) {}

    /// Record operation (no-op).
    pub fn record_operation(&self, _operation: &str, _duration_seconds: f64, _success: bool) {}

    /// Record transaction retry (no-op).
    pub fn record_transaction_retry(&self) {}
}

/// Helper for timing operations.
#[derive(Debug, Clone)]
pub struct OperationTimer {
    start: std::time::Instant,
    operation: &'static str,
}

impl OperationTimer {
    /// Start timing an operation.
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Get the elapsed time in seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Get the operation name.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Finish timing and record the metric.
    pub fn finish(self, metrics: &DatabaseMetrics, success: bool) {
        metrics.record_operation(self.operation, self.elapsed_seconds(), success);
    }
}

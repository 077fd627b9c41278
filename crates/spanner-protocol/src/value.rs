//! Values, rows and result sets.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

use crate::transaction::TransactionInfo;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// BOOL.
    Bool(bool),
    /// INT64.
    Int64(i64),
    /// FLOAT64.
    Float64(f64),
    /// STRING.
    String(String),
    /// BYTES.
    Bytes(Bytes),
    /// TIMESTAMP.
    Timestamp(DateTime<Utc>),
    /// DATE.
    Date(NaiveDate),
    /// ARRAY of values of one type.
    Array(Vec<Value>),
}

impl Value {
    /// Whether the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as an `i64`, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type name as reported by the server.
    pub type_name: String,
}

impl Column {
    /// Create a column descriptor.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A row of values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a row from its values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at the given column index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// Execution statistics attached to a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultSetStats {
    /// Exact number of rows modified by a DML statement.
    pub row_count_exact: Option<i64>,
    /// Lower bound of rows modified by a partitioned DML statement.
    pub row_count_lower_bound: Option<i64>,
}

/// A complete, non-streamed result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    /// Column metadata.
    pub columns: Vec<Column>,
    /// Rows in server order.
    pub rows: Vec<Row>,
    /// Transaction begun inline by the request, if any.
    pub transaction: Option<TransactionInfo>,
    /// Statistics (present for DML).
    pub stats: Option<ResultSetStats>,
}

impl ResultSet {
    /// Modified row count for DML results.
    #[must_use]
    pub fn row_count(&self) -> Option<i64> {
        self.stats
            .and_then(|s| s.row_count_exact.or(s.row_count_lower_bound))
    }
}

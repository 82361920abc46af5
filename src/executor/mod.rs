//! Query executor abstraction
//!
//! Every database-facing component in the pipeline depends on the
//! [`QueryExecutor`] trait rather than a concrete driver, so the same code
//! runs against the real MySQL pool in production and against the in-memory
//! [`fake::FakeExecutor`] in tests.

pub mod fake;
pub mod mysql;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BootstrapError, BootstrapResult};

pub use mysql::MySqlExecutor;

/// Parameter/column value for executor calls
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Lossy rendering for logs and the fake executor's statement journal
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::UInt(u) => u.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::String(s) => s.clone(),
            SqlValue::DateTime(dt) => dt.to_rfc3339(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTime(v)
    }
}

/// A single result row: column names mapped to values, insertion-ordered
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from (column, value) pairs
    pub fn from_pairs(pairs: Vec<(&str, SqlValue)>) -> Self {
        Row {
            columns: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Value by column name, if present
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Value by positional index
    pub fn get_at(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Required string column
    pub fn get_str(&self, name: &str) -> BootstrapResult<String> {
        match self.get(name) {
            Some(SqlValue::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.render()),
            None => Err(BootstrapError::query(format!("missing column '{}'", name))),
        }
    }

    /// Optional string column; NULL and absent both map to None
    pub fn try_get_str(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(SqlValue::Null) | None => None,
            Some(SqlValue::String(s)) => Some(s.clone()),
            Some(other) => Some(other.render()),
        }
    }

    pub fn get_i64(&self, name: &str) -> BootstrapResult<i64> {
        match self.get(name) {
            Some(SqlValue::Int(i)) => Ok(*i),
            Some(SqlValue::UInt(u)) => Ok(*u as i64),
            Some(SqlValue::Bool(b)) => Ok(*b as i64),
            Some(SqlValue::String(s)) => s
                .parse()
                .map_err(|_| BootstrapError::query(format!("column '{}' is not numeric", name))),
            _ => Err(BootstrapError::query(format!(
                "missing numeric column '{}'",
                name
            ))),
        }
    }

    pub fn get_bool(&self, name: &str) -> BootstrapResult<bool> {
        Ok(self.get_i64(name)? != 0)
    }

    pub fn get_datetime(&self, name: &str) -> BootstrapResult<DateTime<Utc>> {
        match self.get(name) {
            Some(SqlValue::DateTime(dt)) => Ok(*dt),
            Some(SqlValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    BootstrapError::query(format!("column '{}' is not a timestamp", name))
                }),
            _ => Err(BootstrapError::query(format!(
                "missing timestamp column '{}'",
                name
            ))),
        }
    }

    /// Flatten into a map for context snapshots
    pub fn to_map(&self) -> HashMap<String, String> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.render()))
            .collect()
    }
}

/// Transaction handle produced by [`QueryExecutor::begin`].
///
/// Commit and rollback consume the handle, so a transaction cannot be used
/// after it has been resolved.
#[async_trait]
pub trait ExecutorTransaction: Send {
    /// Execute a statement inside the transaction, returning affected rows
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64>;

    async fn commit(self: Box<Self>) -> BootstrapResult<()>;

    async fn rollback(self: Box<Self>) -> BootstrapResult<()>;
}

/// The single seam between the bootstrap pipeline and the database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a statement, returning the affected-row count
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64>;

    /// Execute a query, returning every result row
    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Vec<Row>>;

    /// Execute a query, returning at most one row
    async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Option<Row>>;

    /// Begin a transaction
    async fn begin(&self) -> BootstrapResult<Box<dyn ExecutorTransaction>>;

    /// Acquire-and-release connectivity check
    async fn ping(&self) -> BootstrapResult<()>;

    /// The server's version string, as reported by `SELECT VERSION()`
    async fn server_version(&self) -> BootstrapResult<Option<String>> {
        let row = self
            .fetch_optional("SELECT VERSION() AS version", &[])
            .await?;
        Ok(row.and_then(|row| row.try_get_str("version")))
    }

    /// Close the underlying pool
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_is_case_insensitive() {
        let row = Row::from_pairs(vec![("Version", SqlValue::from("8.0.32"))]);
        assert_eq!(row.get_str("version").unwrap(), "8.0.32");
    }

    #[test]
    fn numeric_coercion_from_strings() {
        let row = Row::from_pairs(vec![("count", SqlValue::from("42"))]);
        assert_eq!(row.get_i64("count").unwrap(), 42);
        assert!(row.get_i64("missing").is_err());
    }

    #[test]
    fn null_maps_to_none() {
        let row = Row::from_pairs(vec![("error", SqlValue::Null)]);
        assert_eq!(row.try_get_str("error"), None);
    }

    #[test]
    fn bool_reads_from_int() {
        let row = Row::from_pairs(vec![("success", SqlValue::Int(1))]);
        assert!(row.get_bool("success").unwrap());
    }
}

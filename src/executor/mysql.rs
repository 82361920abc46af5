//! MySQL query executor backed by a sqlx connection pool
//!
//! Connections are always pool-managed: `acquire` on entry, released on drop,
//! so no exit path can leak a connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Connection, Row as SqlxRow, TypeInfo};
use std::time::Duration;

use super::{ExecutorTransaction, QueryExecutor, Row, SqlValue};
use crate::error::BootstrapResult;

/// Pool sizing and acquire behavior for the real executor
#[derive(Debug, Clone)]
pub struct MySqlExecutorConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for MySqlExecutorConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// [`QueryExecutor`] implementation over `sqlx::MySqlPool`
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Connect to the database URL with the given pool configuration
    pub async fn connect(url: &str, config: MySqlExecutorConfig) -> BootstrapResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn bind_params<'q>(
        mut query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
        params: &'q [SqlValue],
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(Option::<String>::None),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::UInt(u) => query.bind(*u),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::String(s) => query.bind(s.as_str()),
                SqlValue::DateTime(dt) => query.bind(*dt),
            };
        }
        query
    }
}

/// Decode one column of a driver row into a [`SqlValue`].
///
/// MySQL reports column types by name; anything unrecognized is read as a
/// string, which covers the information_schema and SHOW GRANTS surfaces this
/// crate actually queries.
fn decode_column(row: &MySqlRow, index: usize) -> SqlValue {
    let type_name = row.columns()[index].type_info().name().to_uppercase();
    match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::UInt)
            .unwrap_or(SqlValue::Null),
        "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::String)
            .unwrap_or(SqlValue::Null),
    }
}

fn convert_row(row: &MySqlRow) -> Row {
    let mut converted = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        converted.push(column.name(), decode_column(row, index));
    }
    converted
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Vec<Row>> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Option<Row>> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(convert_row))
    }

    async fn begin(&self) -> BootstrapResult<Box<dyn ExecutorTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTransaction { tx }))
    }

    async fn ping(&self) -> BootstrapResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct MySqlTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl ExecutorTransaction for MySqlTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        let query = MySqlExecutor::bind_params(sqlx::query(sql), params);
        let result = query.execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> BootstrapResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BootstrapResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

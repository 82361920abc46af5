//! In-memory fake executor for tests
//!
//! Scriptable stand-in for the real driver: tests register pattern-matched
//! responses, inject failures, and inspect the journal of applied statements.
//! The fake also emulates the migration tracking table so the engine's
//! idempotency logic can be exercised end to end without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ExecutorTransaction, QueryExecutor, Row, SqlValue};
use crate::error::{BootstrapError, BootstrapResult};

/// Canned response for a matched statement
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Return these rows from fetch calls (empty affected count on execute)
    Rows(Vec<Row>),
    /// Report this many affected rows
    Affected(u64),
    /// Fail with a query error carrying an optional driver code
    Fail {
        message: String,
        code: Option<String>,
    },
}

struct Rule {
    pattern: String,
    response: FakeResponse,
    remaining: Option<u32>,
}

/// A row of the emulated tracking table
#[derive(Debug, Clone)]
pub struct TrackedMigration {
    pub checksum: String,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub success: bool,
}

struct FakeState {
    rules: Mutex<Vec<Rule>>,
    journal: Mutex<Vec<String>>,
    tracking: Mutex<HashMap<String, TrackedMigration>>,
    tracking_table: String,
    ping_failures: AtomicU32,
    ping_attempts: AtomicU32,
}

impl FakeState {
    fn match_rule(&self, sql: &str) -> Option<FakeResponse> {
        let lowered = sql.to_lowercase();
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if let Some(0) = rule.remaining {
                continue;
            }
            if lowered.contains(&rule.pattern) {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                return Some(rule.response.clone());
            }
        }
        None
    }

    fn is_tracking_statement(&self, sql: &str) -> bool {
        sql.to_lowercase().contains(&self.tracking_table.to_lowercase())
    }

    /// Apply one statement to shared state; returns affected rows
    fn apply(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        if let Some(response) = self.match_rule(sql) {
            return match response {
                FakeResponse::Fail { message, code } => {
                    Err(BootstrapError::Query { message, code })
                }
                FakeResponse::Affected(n) => {
                    self.journal.lock().unwrap().push(journal_entry(sql, params));
                    Ok(n)
                }
                FakeResponse::Rows(_) => {
                    self.journal.lock().unwrap().push(journal_entry(sql, params));
                    Ok(0)
                }
            };
        }

        if self.is_tracking_statement(sql) {
            let affected = self.apply_tracking(sql, params)?;
            self.journal.lock().unwrap().push(journal_entry(sql, params));
            return Ok(affected);
        }

        self.journal.lock().unwrap().push(journal_entry(sql, params));
        Ok(0)
    }

    /// Emulate the tracking-table upsert/create issued by the migration engine
    fn apply_tracking(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        let lowered = sql.trim().to_lowercase();
        if lowered.starts_with("create table") {
            return Ok(0);
        }
        if lowered.starts_with("insert into") {
            // Engine upsert parameter order:
            // (script_name, checksum, executed_at, execution_time, success)
            let name = param_string(params, 0)?;
            let checksum = param_string(params, 1)?;
            let executed_at = match params.get(2) {
                Some(SqlValue::DateTime(dt)) => *dt,
                _ => Utc::now(),
            };
            let execution_time_ms = match params.get(3) {
                Some(SqlValue::Int(ms)) => *ms,
                Some(SqlValue::UInt(ms)) => *ms as i64,
                _ => 0,
            };
            let success = match params.get(4) {
                Some(SqlValue::Bool(b)) => *b,
                Some(SqlValue::Int(i)) => *i != 0,
                _ => false,
            };
            let mut tracking = self.tracking.lock().unwrap();
            let replaced = tracking
                .insert(
                    name,
                    TrackedMigration {
                        checksum,
                        executed_at,
                        execution_time_ms,
                        success,
                    },
                )
                .is_some();
            return Ok(if replaced { 2 } else { 1 });
        }
        if lowered.starts_with("delete") {
            if let Ok(name) = param_string(params, 0) {
                let removed = self.tracking.lock().unwrap().remove(&name).is_some();
                return Ok(removed as u64);
            }
            return Ok(0);
        }
        Ok(0)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Vec<Row>> {
        if let Some(response) = self.match_rule(sql) {
            return match response {
                FakeResponse::Fail { message, code } => {
                    Err(BootstrapError::Query { message, code })
                }
                FakeResponse::Rows(rows) => Ok(rows),
                FakeResponse::Affected(_) => Ok(Vec::new()),
            };
        }

        let lowered = sql.trim().to_lowercase();
        if lowered.starts_with("select") && self.is_tracking_statement(sql) {
            let tracking = self.tracking.lock().unwrap();
            let mut rows: Vec<Row> = tracking
                .iter()
                .map(|(name, record)| {
                    Row::from_pairs(vec![
                        ("script_name", SqlValue::from(name.clone())),
                        ("checksum", SqlValue::from(record.checksum.clone())),
                        ("executed_at", SqlValue::from(record.executed_at)),
                        ("execution_time", SqlValue::Int(record.execution_time_ms)),
                        ("success", SqlValue::Bool(record.success)),
                    ])
                })
                .collect();
            rows.sort_by_key(|row| row.get_str("script_name").unwrap_or_default());
            return Ok(rows);
        }
        let _ = params;
        Ok(Vec::new())
    }
}

fn journal_entry(sql: &str, params: &[SqlValue]) -> String {
    if params.is_empty() {
        sql.trim().to_string()
    } else {
        let rendered: Vec<String> = params.iter().map(|p| p.render()).collect();
        format!("{} -- [{}]", sql.trim(), rendered.join(", "))
    }
}

fn param_string(params: &[SqlValue], index: usize) -> BootstrapResult<String> {
    params
        .get(index)
        .map(|p| p.render())
        .ok_or_else(|| BootstrapError::query(format!("missing parameter {}", index)))
}

/// Scriptable in-memory [`QueryExecutor`]
pub struct FakeExecutor {
    state: Arc<FakeState>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::with_tracking_table("schema_migrations")
    }

    /// Use a custom tracking-table name for the emulation
    pub fn with_tracking_table(table: &str) -> Self {
        Self {
            state: Arc::new(FakeState {
                rules: Mutex::new(Vec::new()),
                journal: Mutex::new(Vec::new()),
                tracking: Mutex::new(HashMap::new()),
                tracking_table: table.to_string(),
                ping_failures: AtomicU32::new(0),
                ping_attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Respond to any statement containing `pattern` (case-insensitive)
    pub fn when(&self, pattern: &str, response: FakeResponse) {
        self.state.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_lowercase(),
            response,
            remaining: None,
        });
    }

    /// Like [`FakeExecutor::when`], but the rule expires after `times` matches
    pub fn when_times(&self, pattern: &str, times: u32, response: FakeResponse) {
        self.state.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_lowercase(),
            response,
            remaining: Some(times),
        });
    }

    /// Make the next `count` pings fail with a connection-refused error
    pub fn fail_pings(&self, count: u32) {
        self.state.ping_failures.store(count, Ordering::SeqCst);
    }

    /// Number of pings attempted so far
    pub fn ping_attempts(&self) -> u32 {
        self.state.ping_attempts.load(Ordering::SeqCst)
    }

    /// Statements applied so far (committed transactions only)
    pub fn journal(&self) -> Vec<String> {
        self.state.journal.lock().unwrap().clone()
    }

    /// Emulated tracking-table record for a script, if any
    pub fn tracked(&self, script_name: &str) -> Option<TrackedMigration> {
        self.state.tracking.lock().unwrap().get(script_name).cloned()
    }

    /// Number of scripts in the emulated tracking table
    pub fn tracked_count(&self) -> usize {
        self.state.tracking.lock().unwrap().len()
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FakeExecutor {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        self.state.apply(sql, params)
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Vec<Row>> {
        self.state.query(sql, params)
    }

    async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> BootstrapResult<Option<Row>> {
        Ok(self.state.query(sql, params)?.into_iter().next())
    }

    async fn begin(&self) -> BootstrapResult<Box<dyn ExecutorTransaction>> {
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
            buffered: Vec::new(),
        }))
    }

    async fn ping(&self) -> BootstrapResult<()> {
        self.state.ping_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.ping_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.ping_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BootstrapError::Connection(
                "connect ECONNREFUSED 127.0.0.1:3306".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) {}
}

/// Buffers statements until commit; rollback discards them, which is what
/// makes the engine's no-partial-persistence property observable in tests.
struct FakeTransaction {
    state: Arc<FakeState>,
    buffered: Vec<(String, Vec<SqlValue>)>,
}

#[async_trait]
impl ExecutorTransaction for FakeTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> BootstrapResult<u64> {
        if let Some(response) = self.state.match_rule(sql) {
            match response {
                FakeResponse::Fail { message, code } => {
                    return Err(BootstrapError::Query { message, code });
                }
                FakeResponse::Affected(n) => {
                    self.buffered.push((sql.to_string(), params.to_vec()));
                    return Ok(n);
                }
                FakeResponse::Rows(_) => {
                    self.buffered.push((sql.to_string(), params.to_vec()));
                    return Ok(0);
                }
            }
        }
        self.buffered.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> BootstrapResult<()> {
        for (sql, params) in &self.buffered {
            if self.state.is_tracking_statement(sql) {
                self.state.apply_tracking(sql, params)?;
            }
            self.state
                .journal
                .lock()
                .unwrap()
                .push(journal_entry(sql, params));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BootstrapResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rules_match_case_insensitively() {
        let fake = FakeExecutor::new();
        fake.when(
            "select version()",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "version",
                SqlValue::from("8.0.32"),
            )])]),
        );
        let row = fake
            .fetch_optional("SELECT VERSION()", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("version").unwrap(), "8.0.32");
    }

    #[tokio::test]
    async fn server_version_reads_the_version_row() {
        let fake = FakeExecutor::new();
        fake.when(
            "select version()",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "version",
                SqlValue::from("8.0.32"),
            )])]),
        );
        assert_eq!(
            fake.server_version().await.unwrap().as_deref(),
            Some("8.0.32")
        );
    }

    #[tokio::test]
    async fn ping_failure_countdown() {
        let fake = FakeExecutor::new();
        fake.fail_pings(2);
        assert!(fake.ping().await.is_err());
        assert!(fake.ping().await.is_err());
        assert!(fake.ping().await.is_ok());
        assert_eq!(fake.ping_attempts(), 3);
    }

    #[tokio::test]
    async fn rollback_discards_buffered_statements() {
        let fake = FakeExecutor::new();
        let mut tx = fake.begin().await.unwrap();
        tx.execute("CREATE TABLE t (id INT)", &[]).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(fake.journal().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_buffered_statements() {
        let fake = FakeExecutor::new();
        let mut tx = fake.begin().await.unwrap();
        tx.execute("CREATE TABLE t (id INT)", &[]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(fake.journal().len(), 1);
    }

    #[tokio::test]
    async fn tracking_upsert_and_select_round_trip() {
        let fake = FakeExecutor::new();
        fake.execute(
            "INSERT INTO schema_migrations (script_name, checksum, executed_at, execution_time, success) \
             VALUES (?, ?, ?, ?, ?) ON DUPLICATE KEY UPDATE checksum = VALUES(checksum)",
            &[
                SqlValue::from("00-init.sql"),
                SqlValue::from("abc123"),
                SqlValue::from(Utc::now()),
                SqlValue::Int(12),
                SqlValue::Bool(true),
            ],
        )
        .await
        .unwrap();

        let rows = fake
            .fetch_all("SELECT script_name, checksum FROM schema_migrations", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("checksum").unwrap(), "abc123");
        assert!(fake.tracked("00-init.sql").unwrap().success);
    }

    #[tokio::test]
    async fn expiring_rule_stops_matching() {
        let fake = FakeExecutor::new();
        fake.when_times(
            "flush privileges",
            1,
            FakeResponse::Fail {
                message: "flush failed".into(),
                code: None,
            },
        );
        assert!(fake.execute("FLUSH PRIVILEGES", &[]).await.is_err());
        assert!(fake.execute("FLUSH PRIVILEGES", &[]).await.is_ok());
    }
}

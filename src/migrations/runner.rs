//! Migration execution engine.
//!
//! Each script runs inside its own transaction; any statement failure rolls
//! the whole script back. Every attempt, successful or not, is recorded in
//! the tracking table so the next run knows what to retry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::definitions::{
    ExecutionReason, MigrationDecision, MigrationOptions, MigrationRecord, MigrationRunResult,
    MigrationScript, ScriptResult,
};
use super::discovery::{discover_scripts, validate_ordering};
use super::splitter::split_statements;
use crate::classify::ErrorClassifier;
use crate::error::{BootstrapError, BootstrapResult};
use crate::executor::{QueryExecutor, SqlValue};

/// Engine configuration independent of a single run's options.
#[derive(Debug, Clone)]
pub struct MigrationEngineConfig {
    /// Name of the table holding execution records.
    pub tracking_table: String,
    /// Target database, used for lightweight post-execution checks.
    pub database: Option<String>,
}

impl Default for MigrationEngineConfig {
    fn default() -> Self {
        Self {
            tracking_table: "schema_migrations".to_string(),
            database: None,
        }
    }
}

pub struct MigrationEngine {
    executor: Arc<dyn QueryExecutor>,
    config: MigrationEngineConfig,
    classifier: ErrorClassifier,
}

impl MigrationEngine {
    pub fn new(executor: Arc<dyn QueryExecutor>, config: MigrationEngineConfig) -> Self {
        Self {
            executor,
            config,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Discovers scripts under `dir` and brings the database up to date.
    ///
    /// Scripts already recorded with an identical checksum are skipped;
    /// never-run scripts, previously failed scripts, and scripts whose
    /// content changed are executed in ascending order. The batch aborts at
    /// the first failure unless `options.skip_failed_scripts` is set.
    pub async fn run(
        &self,
        dir: &Path,
        options: &MigrationOptions,
    ) -> BootstrapResult<MigrationRunResult> {
        let started = Instant::now();
        let scripts = discover_scripts(dir, options.max_script_bytes)?;

        let validation_issues = validate_ordering(&scripts);
        if !validation_issues.is_empty() {
            if options.strict_ordering {
                return Err(BootstrapError::Migration(format!(
                    "ordering validation failed: {}",
                    validation_issues[0].message
                )));
            }
            for issue in &validation_issues {
                warn!(remediation = %issue.remediation, "{}", issue.message);
            }
        }

        let skip_pattern = match &options.skip_pattern {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };

        if !options.dry_run {
            self.ensure_tracking_table().await?;
        }
        let records = if options.dry_run {
            // A dry run must not create the tracking table, so a missing
            // table just means nothing has run yet.
            self.load_records().await.unwrap_or_default()
        } else {
            self.load_records().await?
        };

        let mut result = MigrationRunResult {
            discovered: scripts.len(),
            executed: 0,
            skipped: 0,
            failed: 0,
            dry_run: options.dry_run,
            results: Vec::new(),
            validation_issues,
            total_duration_ms: 0,
        };

        for script in &scripts {
            if is_excluded(script, options, skip_pattern.as_ref()) {
                info!(script = %script.filename, "excluded by skip configuration");
                result.skipped += 1;
                result.results.push(ScriptResult::skipped(&script.filename));
                continue;
            }

            let reason = match decide(script, &records) {
                MigrationDecision::Execute(reason) => reason,
                MigrationDecision::AlreadyApplied => {
                    debug!(script = %script.filename, "already applied, checksum unchanged");
                    result.skipped += 1;
                    result.results.push(ScriptResult::skipped(&script.filename));
                    continue;
                }
                // Exclusion is decided above; decide() never returns it.
                MigrationDecision::Excluded => continue,
            };

            // Deadline is enforced here, before the next transaction
            // begins; a script that has started always runs to commit or
            // rollback.
            if let Some(budget) = options.time_budget {
                if started.elapsed() >= budget {
                    warn!(
                        script = %script.filename,
                        budget_ms = budget.as_millis() as u64,
                        "migration batch exceeded its time budget"
                    );
                    return Err(BootstrapError::Timeout(budget.as_millis() as u64));
                }
            }

            if options.dry_run {
                info!(script = %script.filename, ?reason, "would execute");
                result.executed += 1;
                result.results.push(ScriptResult {
                    filename: script.filename.clone(),
                    executed: false,
                    success: true,
                    reason: Some(reason),
                    skipped: false,
                    statements: split_statements(&script.content).len(),
                    affected_rows: 0,
                    duration_ms: 0,
                    error: None,
                    warnings: Vec::new(),
                });
                continue;
            }

            let mut script_result = self.execute_script(script, reason).await;
            if let Err(err) = self
                .record_attempt(script, script_result.success, script_result.duration_ms)
                .await
            {
                warn!(script = %script.filename, %err, "failed to record migration attempt");
                script_result
                    .warnings
                    .push(format!("tracking record not persisted: {}", err));
            }

            let failed = !script_result.success;
            if failed {
                result.failed += 1;
            } else {
                result.executed += 1;
            }
            result.results.push(script_result);

            if failed && !options.skip_failed_scripts {
                warn!(script = %script.filename, "aborting batch after failure");
                break;
            }
        }

        result.total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            discovered = result.discovered,
            executed = result.executed,
            skipped = result.skipped,
            failed = result.failed,
            dry_run = result.dry_run,
            "migration run finished"
        );
        Ok(result)
    }

    async fn ensure_tracking_table(&self) -> BootstrapResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{table}` (\
             script_name VARCHAR(255) NOT NULL PRIMARY KEY, \
             checksum VARCHAR(64) NOT NULL, \
             executed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             execution_time BIGINT NOT NULL DEFAULT 0, \
             success TINYINT(1) NOT NULL DEFAULT 1\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            table = self.config.tracking_table
        );
        self.executor.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn load_records(&self) -> BootstrapResult<HashMap<String, MigrationRecord>> {
        let sql = format!(
            "SELECT script_name, checksum, executed_at, execution_time, success FROM `{}`",
            self.config.tracking_table
        );
        let rows = self.executor.fetch_all(&sql, &[]).await?;
        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = MigrationRecord {
                script_name: row.get_str("script_name")?,
                checksum: row.get_str("checksum")?,
                executed_at: row.get_datetime("executed_at")?,
                execution_time_ms: row.get_i64("execution_time")?,
                success: row.get_bool("success")?,
            };
            records.insert(record.script_name.clone(), record);
        }
        Ok(records)
    }

    async fn execute_script(&self, script: &MigrationScript, reason: ExecutionReason) -> ScriptResult {
        let started = Instant::now();
        let statements = split_statements(&script.content);
        info!(
            script = %script.filename,
            ?reason,
            statements = statements.len(),
            "executing migration"
        );

        let mut result = ScriptResult {
            filename: script.filename.clone(),
            executed: true,
            success: false,
            reason: Some(reason),
            skipped: false,
            statements: statements.len(),
            affected_rows: 0,
            duration_ms: 0,
            error: None,
            warnings: Vec::new(),
        };

        let mut tx = match self.executor.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                result.error = Some(self.describe_failure(&err, script));
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        for statement in &statements {
            match tx.execute(statement, &[]).await {
                Ok(affected) => result.affected_rows += affected,
                Err(err) => {
                    result.error = Some(self.describe_failure(&err, script));
                    if let Err(rb_err) = tx.rollback().await {
                        warn!(script = %script.filename, %rb_err, "rollback failed");
                    }
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                }
            }
        }

        if let Err(err) = tx.commit().await {
            result.error = Some(self.describe_failure(&err, script));
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        result.success = true;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.warnings = self.post_execution_warnings(script, &statements).await;
        result
    }

    /// Classifies the failure for logging and returns a compact description
    /// for the script result.
    fn describe_failure(&self, err: &BootstrapError, script: &MigrationScript) -> String {
        let categorized = self.classifier.classify(
            err,
            "migration_execute",
            Some(json!({ "script": script.filename })),
        );
        error!(
            script = %script.filename,
            code = %categorized.code,
            category = ?categorized.category,
            "migration script failed"
        );
        categorized.to_string()
    }

    /// Cheap sanity check after a successful script: a schema-creating
    /// script should leave at least one table behind.
    async fn post_execution_warnings(
        &self,
        script: &MigrationScript,
        statements: &[String],
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        let database = match &self.config.database {
            Some(db) => db,
            None => return warnings,
        };
        let creates_tables = statements
            .iter()
            .any(|s| s.to_uppercase().starts_with("CREATE TABLE"));
        if !creates_tables {
            return warnings;
        }

        let sql = "SELECT COUNT(*) AS table_count FROM information_schema.TABLES \
                   WHERE TABLE_SCHEMA = ?";
        match self
            .executor
            .fetch_optional(sql, &[SqlValue::from(database.clone())])
            .await
        {
            Ok(Some(row)) => {
                if let Ok(count) = row.get_i64("table_count") {
                    if count == 0 {
                        warnings.push(format!(
                            "{} creates tables but none are visible in {}",
                            script.filename, database
                        ));
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!(script = %script.filename, %err, "post-execution check unavailable");
            }
        }
        warnings
    }

    /// Upserts the latest attempt for the script, outside the script's
    /// transaction so failed attempts are recorded too.
    async fn record_attempt(
        &self,
        script: &MigrationScript,
        success: bool,
        duration_ms: u64,
    ) -> BootstrapResult<()> {
        let sql = format!(
            "INSERT INTO `{table}` (script_name, checksum, executed_at, execution_time, success) \
             VALUES (?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE checksum = VALUES(checksum), \
             executed_at = VALUES(executed_at), \
             execution_time = VALUES(execution_time), \
             success = VALUES(success)",
            table = self.config.tracking_table
        );
        self.executor
            .execute(
                &sql,
                &[
                    SqlValue::from(script.filename.clone()),
                    SqlValue::from(script.checksum.clone()),
                    SqlValue::DateTime(Utc::now()),
                    SqlValue::Int(duration_ms as i64),
                    SqlValue::Bool(success),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Compares a discovered script against its tracking record.
fn decide(script: &MigrationScript, records: &HashMap<String, MigrationRecord>) -> MigrationDecision {
    match records.get(&script.filename) {
        None => MigrationDecision::Execute(ExecutionReason::NeverRun),
        Some(record) if !record.success => {
            MigrationDecision::Execute(ExecutionReason::PreviousFailure)
        }
        Some(record) if record.checksum != script.checksum => {
            MigrationDecision::Execute(ExecutionReason::ChecksumChanged)
        }
        Some(_) => MigrationDecision::AlreadyApplied,
    }
}

fn is_excluded(
    script: &MigrationScript,
    options: &MigrationOptions,
    pattern: Option<&Regex>,
) -> bool {
    if options
        .skip_scripts
        .iter()
        .any(|name| name == &script.filename)
    {
        return true;
    }
    pattern.map(|re| re.is_match(&script.filename)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::{FakeExecutor, FakeResponse};
    use std::fs;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn engine(fake: &FakeExecutor) -> MigrationEngine {
        MigrationEngine::new(Arc::new(fake.clone()), MigrationEngineConfig::default())
    }

    #[tokio::test]
    async fn fresh_run_executes_scripts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "02-data.sql", "INSERT INTO users VALUES (1);");
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id INT);");

        let fake = FakeExecutor::new();
        let result = engine(&fake)
            .run(dir.path(), &MigrationOptions::default())
            .await
            .unwrap();

        assert_eq!(result.discovered, 2);
        assert_eq!(result.executed, 2);
        assert_eq!(result.failed, 0);
        assert!(result.succeeded());
        assert_eq!(fake.tracked_count(), 2);

        let journal = fake.journal();
        let schema_pos = journal
            .iter()
            .position(|e| e.contains("CREATE TABLE users"))
            .unwrap();
        let data_pos = journal
            .iter()
            .position(|e| e.contains("INSERT INTO users"))
            .unwrap();
        assert!(schema_pos < data_pos);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id INT);");

        let fake = FakeExecutor::new();
        let eng = engine(&fake);
        eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();

        let second = eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();
        assert_eq!(second.executed, 0);
        assert_eq!(second.skipped, 1);
        // The script statement itself must have run exactly once.
        let applications = fake
            .journal()
            .iter()
            .filter(|e| e.contains("CREATE TABLE users"))
            .count();
        assert_eq!(applications, 1);
    }

    #[tokio::test]
    async fn changed_checksum_triggers_re_execution() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id INT);");

        let fake = FakeExecutor::new();
        let eng = engine(&fake);
        eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();
        let original = fake.tracked("01-schema.sql").unwrap();

        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id BIGINT);");
        let second = eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();
        assert_eq!(second.executed, 1);
        assert_eq!(second.results[0].reason, Some(ExecutionReason::ChecksumChanged));

        let updated = fake.tracked("01-schema.sql").unwrap();
        assert_ne!(original.checksum, updated.checksum);
    }

    #[tokio::test]
    async fn failed_script_is_recorded_and_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE broken (id INT);");

        let fake = FakeExecutor::new();
        fake.when_times(
            "CREATE TABLE broken",
            1,
            FakeResponse::Fail {
                message: "You have an error in your SQL syntax".to_string(),
                code: Some("1064".to_string()),
            },
        );

        let eng = engine(&fake);
        let first = eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(!fake.tracked("01-schema.sql").unwrap().success);

        let second = eng.run(dir.path(), &MigrationOptions::default()).await.unwrap();
        assert_eq!(second.executed, 1);
        assert_eq!(
            second.results[0].reason,
            Some(ExecutionReason::PreviousFailure)
        );
        assert!(fake.tracked("01-schema.sql").unwrap().success);
    }

    #[tokio::test]
    async fn failure_mid_script_rolls_back_earlier_statements() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "01-multi.sql",
            "CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);",
        );

        let fake = FakeExecutor::new();
        fake.when(
            "CREATE TABLE b",
            FakeResponse::Fail {
                message: "Table 'b' already exists".to_string(),
                code: Some("1050".to_string()),
            },
        );

        let result = engine(&fake)
            .run(dir.path(), &MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        // The first statement must not have been applied.
        assert!(!fake.journal().iter().any(|e| e.contains("CREATE TABLE a")));
    }

    #[tokio::test]
    async fn batch_aborts_at_first_failure_by_default() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-bad.sql", "CREATE TABLE bad (id INT);");
        write_script(dir.path(), "02-good.sql", "CREATE TABLE good (id INT);");

        let fake = FakeExecutor::new();
        fake.when(
            "CREATE TABLE bad",
            FakeResponse::Fail {
                message: "boom".to_string(),
                code: None,
            },
        );

        let result = engine(&fake)
            .run(dir.path(), &MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.executed, 0);
        assert_eq!(result.results.len(), 1);
        assert!(fake.tracked("02-good.sql").is_none());
    }

    #[tokio::test]
    async fn skip_failed_scripts_continues_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-bad.sql", "CREATE TABLE bad (id INT);");
        write_script(dir.path(), "02-good.sql", "CREATE TABLE good (id INT);");

        let fake = FakeExecutor::new();
        fake.when(
            "CREATE TABLE bad",
            FakeResponse::Fail {
                message: "boom".to_string(),
                code: None,
            },
        );

        let options = MigrationOptions {
            skip_failed_scripts: true,
            ..Default::default()
        };
        let result = engine(&fake).run(dir.path(), &options).await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.executed, 1);
        assert!(fake.tracked("02-good.sql").unwrap().success);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id INT);");

        let fake = FakeExecutor::new();
        let options = MigrationOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = engine(&fake).run(dir.path(), &options).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.executed, 1);
        assert!(!result.results[0].executed);
        assert_eq!(fake.tracked_count(), 0);
        assert!(fake.journal().is_empty());
    }

    #[tokio::test]
    async fn skip_list_and_pattern_exclude_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-keep.sql", "CREATE TABLE keep (id INT);");
        write_script(dir.path(), "02-seed-dev.sql", "INSERT INTO keep VALUES (1);");
        write_script(dir.path(), "03-skip-me.sql", "CREATE TABLE nope (id INT);");

        let options = MigrationOptions {
            skip_scripts: vec!["03-skip-me.sql".to_string()],
            skip_pattern: Some(r"-seed-".to_string()),
            ..Default::default()
        };
        let fake = FakeExecutor::new();
        let result = engine(&fake).run(dir.path(), &options).await.unwrap();
        assert_eq!(result.executed, 1);
        assert_eq!(result.skipped, 2);
        assert!(fake.tracked("01-keep.sql").is_some());
        assert!(fake.tracked("03-skip-me.sql").is_none());
    }

    #[tokio::test]
    async fn strict_ordering_rejects_duplicate_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-a.sql", "SELECT 1;");
        write_script(dir.path(), "01-b.sql", "SELECT 1;");

        let options = MigrationOptions {
            strict_ordering: true,
            ..Default::default()
        };
        let fake = FakeExecutor::new();
        let err = engine(&fake).run(dir.path(), &options).await.unwrap_err();
        assert!(err.to_string().contains("ordering validation failed"));
    }

    #[tokio::test]
    async fn lenient_ordering_keeps_issues_as_warnings() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "unprefixed.sql", "SELECT 1;");

        let fake = FakeExecutor::new();
        let result = engine(&fake)
            .run(dir.path(), &MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(result.validation_issues.len(), 1);
        assert_eq!(result.executed, 1);
    }

    #[tokio::test]
    async fn exhausted_time_budget_stops_before_the_next_script() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-schema.sql", "CREATE TABLE users (id INT);");

        let options = MigrationOptions {
            time_budget: Some(std::time::Duration::ZERO),
            ..Default::default()
        };
        let fake = FakeExecutor::new();
        let err = engine(&fake).run(dir.path(), &options).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Timeout(_)));
        // No script transaction was started, let alone cancelled.
        assert!(!fake.journal().iter().any(|e| e.contains("CREATE TABLE users")));
        assert_eq!(fake.tracked_count(), 0);
    }

    #[tokio::test]
    async fn invalid_skip_pattern_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-a.sql", "SELECT 1;");

        let options = MigrationOptions {
            skip_pattern: Some("[unclosed".to_string()),
            ..Default::default()
        };
        let fake = FakeExecutor::new();
        assert!(engine(&fake).run(dir.path(), &options).await.is_err());
    }
}

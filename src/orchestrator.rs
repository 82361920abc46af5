//! Startup orchestration.
//!
//! Runs the bootstrap pipeline exactly once per process: provisioning,
//! migrations, a final health verdict, and optional schema validation.
//! Concurrent callers share a single run through a `OnceCell`; later
//! callers get the memoized report.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::classify::ErrorClassifier;
use crate::config::{BootstrapConfig, Environment, FallbackBehavior};
use crate::error::{BootstrapError, BootstrapResult};
use crate::executor::QueryExecutor;
use crate::health::{ConnectionHealthProber, HealthCheckResult, HealthProberConfig};
use crate::migrations::{MigrationEngine, MigrationEngineConfig, MigrationOptions, MigrationRunResult};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::provision::{ProvisionOptions, ProvisionReport, Provisioner, UserSpec};
use crate::report::{SummaryReport, SummaryReporter};
use crate::schema::{ExpectedSchema, SchemaDetector, SchemaReport};

/// Final state of a bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Every stage succeeded.
    Completed,
    /// Bootstrap was skipped by policy (disabled, or production opt-out).
    Skipped,
    /// A stage failed but the configured fallback keeps the process alive.
    Degraded,
    /// A stage failed and the configured fallback aborts startup.
    Failed,
}

/// Everything a caller can learn about the bootstrap run.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub outcome: StartupOutcome,
    pub health: Option<HealthCheckResult>,
    pub provision: Option<ProvisionReport>,
    pub migrations: Option<MigrationRunResult>,
    pub schema: Option<SchemaReport>,
    pub summary: SummaryReport,
    pub duration: Duration,
    /// True when this run was the fallback retry of a failed first attempt.
    pub retried: bool,
}

impl StartupReport {
    pub fn is_operational(&self) -> bool {
        !matches!(self.outcome, StartupOutcome::Failed)
    }
}

/// One stage's contribution to the pipeline outcome.
struct PipelineState {
    health: Option<HealthCheckResult>,
    provision: Option<ProvisionReport>,
    migrations: Option<MigrationRunResult>,
    schema: Option<SchemaReport>,
    summary: SummaryReport,
    succeeded: bool,
}

/// Coordinates the full bootstrap and memoizes its result.
pub struct StartupOrchestrator {
    config: BootstrapConfig,
    executor: Arc<dyn QueryExecutor>,
    expected_schema: Option<ExpectedSchema>,
    observers: Vec<Arc<dyn ProgressObserver>>,
    cell: OnceCell<Arc<StartupReport>>,
}

impl StartupOrchestrator {
    pub fn new(config: BootstrapConfig, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            config,
            executor,
            expected_schema: None,
            observers: Vec::new(),
            cell: OnceCell::new(),
        }
    }

    /// Enable post-migration schema validation against an expected layout.
    pub fn with_expected_schema(mut self, expected: ExpectedSchema) -> Self {
        self.expected_schema = Some(expected);
        self
    }

    /// Register an observer notified on every pipeline step transition.
    pub fn with_progress_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Runs the bootstrap once and returns the shared report.
    ///
    /// The first caller executes the pipeline; concurrent and later callers
    /// await and share the same report. Returns an error only when the run
    /// failed and the configured fallback is [`FallbackBehavior::Exit`].
    pub async fn ensure_initialized(&self) -> BootstrapResult<Arc<StartupReport>> {
        let report = self
            .cell
            .get_or_init(|| async { Arc::new(self.run_bootstrap().await) })
            .await;
        if report.outcome == StartupOutcome::Failed {
            return Err(BootstrapError::HealthCheck(
                "database bootstrap failed and fallback behavior is exit".to_string(),
            ));
        }
        Ok(Arc::clone(report))
    }

    /// The memoized report, if a run has completed.
    pub fn report(&self) -> Option<Arc<StartupReport>> {
        self.cell.get().cloned()
    }

    /// Clears the memoized run so the next call executes again.
    pub fn reset(&mut self) {
        self.cell = OnceCell::new();
    }

    async fn run_bootstrap(&self) -> StartupReport {
        let started = Instant::now();

        if let Some(reason) = self.skip_reason() {
            info!(reason, "database bootstrap skipped");
            let mut reporter =
                SummaryReporter::new().with_configuration(self.config.snapshot());
            reporter.record_skipped("bootstrap", reason);
            return StartupReport {
                outcome: StartupOutcome::Skipped,
                health: None,
                provision: None,
                migrations: None,
                schema: None,
                summary: reporter.finalize(),
                duration: started.elapsed(),
                retried: false,
            };
        }

        let mut state = self.run_pipeline().await;
        let mut retried = false;
        if !state.succeeded && self.config.fallback_behavior == FallbackBehavior::Retry {
            warn!("bootstrap failed, retrying once per fallback policy");
            state = self.run_pipeline().await;
            retried = true;
        }

        let outcome = if state.succeeded {
            StartupOutcome::Completed
        } else {
            match self.config.fallback_behavior {
                FallbackBehavior::Exit => StartupOutcome::Failed,
                // A failed retry falls back to degraded operation.
                FallbackBehavior::Continue | FallbackBehavior::Retry => StartupOutcome::Degraded,
            }
        };

        info!(?outcome, elapsed_ms = started.elapsed().as_millis() as u64, "bootstrap finished");
        StartupReport {
            outcome,
            health: state.health,
            provision: state.provision,
            migrations: state.migrations,
            schema: state.schema,
            summary: state.summary,
            duration: started.elapsed(),
            retried,
        }
    }

    fn skip_reason(&self) -> Option<&'static str> {
        if !self.config.auto_init {
            return Some("auto-init disabled");
        }
        if self.config.skip_in_production && self.config.environment == Environment::Production {
            return Some("production opt-out");
        }
        None
    }

    /// One full pass through the stages, in order: provision, migrate,
    /// probe. Provisioning and migration failures are logged and reflected
    /// in the report but never abort the pass; migrations only run when
    /// provisioning did not fail, and the final health verdict together
    /// with the earlier stages decides the pass outcome.
    async fn run_pipeline(&self) -> PipelineState {
        let mut reporter = SummaryReporter::new().with_configuration(self.config.snapshot());
        let mut state = PipelineState {
            health: None,
            provision: None,
            migrations: None,
            schema: None,
            summary: SummaryReporter::new().finalize(),
            succeeded: false,
        };

        let mut tracker = self.build_tracker();

        // Provisioning first; a failure here is recorded, not fatal.
        let stage_start = Instant::now();
        track(tracker.start_step("provisioning"));
        let provision = self.provisioner().provision(&self.provision_options()).await;
        let provisioned = provision.succeeded();
        if provisioned {
            track(tracker.complete_step("provisioning"));
            reporter.record_success("provisioning", stage_start.elapsed());
        } else {
            let detail = provision
                .verification
                .recommendations
                .first()
                .cloned()
                .unwrap_or_else(|| "provisioning verification failed".to_string());
            warn!(detail = %detail, "provisioning failed, continuing");
            track(tracker.fail_step("provisioning", &detail));
            reporter.record_failure("provisioning", stage_start.elapsed(), &detail);
        }
        state.provision = Some(provision);

        // Migrations run only against a provisioned database; a failed
        // batch is recorded and the pass continues to the health verdict.
        let mut migrations_ok = false;
        if provisioned {
            let stage_start = Instant::now();
            track(tracker.start_step("migrations"));
            match self.run_migrations().await {
                Ok(run) => {
                    if run.succeeded() {
                        migrations_ok = true;
                        track(tracker.complete_step("migrations"));
                        reporter.record_success("migrations", stage_start.elapsed());
                    } else {
                        let detail = run
                            .results
                            .iter()
                            .find_map(|r| r.error.clone())
                            .unwrap_or_else(|| "migration batch failed".to_string());
                        warn!(detail = %detail, "migrations failed, continuing");
                        track(tracker.fail_step("migrations", &detail));
                        reporter.record_failure("migrations", stage_start.elapsed(), &detail);
                    }
                    state.migrations = Some(run);
                }
                Err(err) => {
                    warn!(%err, "migrations failed, continuing");
                    track(tracker.fail_step("migrations", &err.to_string()));
                    reporter.record_failure("migrations", stage_start.elapsed(), &err.to_string());
                }
            }
        } else {
            track(tracker.skip_step("migrations", "provisioning failed"));
            reporter.record_skipped("migrations", "provisioning failed");
        }

        // Final health verdict, raced against the configured timeout.
        let stage_start = Instant::now();
        track(tracker.start_step("health_check"));
        let health = self.probe_health().await;
        let healthy = health.is_healthy;
        if healthy {
            track(tracker.complete_step("health_check"));
            reporter.record_success("health_check", stage_start.elapsed());
        } else {
            let detail = health_failure_detail(&health);
            track(tracker.fail_step("health_check", &detail));
            reporter.record_failure("health_check", stage_start.elapsed(), &detail);
        }
        state.health = Some(health);

        // Optional schema validation; advisory, never fails the pipeline.
        if let Some(expected) = &self.expected_schema {
            if healthy {
                let stage_start = Instant::now();
                track(tracker.start_step("schema_validation"));
                let detector = SchemaDetector::new(
                    Arc::clone(&self.executor),
                    &self.config.database_name,
                    expected.clone(),
                );
                match detector.detect().await {
                    Ok(report) => {
                        track(tracker.complete_step("schema_validation"));
                        if report.recommendations.is_empty() {
                            reporter.record_success("schema_validation", stage_start.elapsed());
                        } else {
                            reporter.record_partial(
                                "schema_validation",
                                stage_start.elapsed(),
                                report.recommendations.clone(),
                            );
                        }
                        state.schema = Some(report);
                    }
                    Err(err) => {
                        warn!(%err, "schema validation unavailable");
                        track(tracker.skip_step("schema_validation", &err.to_string()));
                        reporter.record_skipped("schema_validation", &err.to_string());
                    }
                }
            } else {
                track(tracker.skip_step("schema_validation", "database unhealthy"));
                reporter.record_skipped("schema_validation", "database unhealthy");
            }
        }

        state.succeeded = provisioned && migrations_ok && healthy;
        state.summary = reporter.finalize();
        state
    }

    fn build_tracker(&self) -> ProgressTracker {
        let mut tracker = ProgressTracker::new();
        tracker.add_step("provisioning", "Database provisioning", Duration::from_secs(5));
        tracker.add_step("migrations", "Schema migrations", self.config.migration_timeout);
        tracker.add_step(
            "health_check",
            "Database health check",
            self.config.health_check_timeout,
        );
        if self.expected_schema.is_some() {
            tracker.add_step("schema_validation", "Schema validation", Duration::from_secs(5));
        }
        for observer in &self.observers {
            tracker.register_observer(Arc::clone(observer));
        }
        tracker
    }

    async fn probe_health(&self) -> HealthCheckResult {
        let prober = ConnectionHealthProber::new(
            Arc::clone(&self.executor),
            HealthProberConfig {
                max_attempts: self.config.retry_attempts,
                retry_delay: self.config.retry_delay,
                min_server_version: self.config.min_server_version.clone(),
                required_privileges: self.config.required_privileges.clone(),
            },
        );
        let budget = self.config.health_check_timeout;
        match timeout(budget, prober.probe()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = budget.as_millis() as u64, "health check timed out");
                HealthCheckResult::timed_out(budget, &ErrorClassifier::new())
            }
        }
    }

    fn provisioner(&self) -> Provisioner {
        Provisioner::new(Arc::clone(&self.executor))
    }

    fn provision_options(&self) -> ProvisionOptions {
        let user = match (&self.config.app_user, &self.config.app_password) {
            (Some(username), Some(password)) => Some(UserSpec {
                username: username.clone(),
                host: self.config.app_user_host.clone(),
                password: password.clone(),
                privileges: self.config.required_privileges.clone(),
            }),
            _ => None,
        };
        ProvisionOptions {
            database: self.config.database_name.clone(),
            charset: self.config.charset.clone(),
            collation: self.config.collation.clone(),
            user,
        }
    }

    async fn run_migrations(&self) -> BootstrapResult<MigrationRunResult> {
        let engine = MigrationEngine::new(
            Arc::clone(&self.executor),
            MigrationEngineConfig {
                tracking_table: self.config.migrations_table.clone(),
                database: Some(self.config.database_name.clone()),
            },
        );
        // The engine enforces the deadline between scripts, so a script
        // whose transaction has begun always commits or rolls back.
        let options = MigrationOptions {
            dry_run: false,
            skip_failed_scripts: false,
            skip_scripts: self.config.skip_scripts.clone(),
            skip_pattern: self.config.skip_pattern.clone(),
            strict_ordering: self.config.strict_ordering,
            time_budget: Some(self.config.migration_timeout),
            ..Default::default()
        };
        engine.run(Path::new(&self.config.migrations_dir), &options).await
    }
}

/// Pick the most specific failure description out of a probe result.
fn health_failure_detail(health: &HealthCheckResult) -> String {
    if let Some(err) = health.errors.first() {
        return err.to_string();
    }
    if let Some(reason) = health
        .version
        .as_ref()
        .and_then(|v| v.reason.clone())
    {
        return reason;
    }
    if let Some(perms) = health
        .permissions
        .as_ref()
        .filter(|p| !p.missing_permissions.is_empty())
    {
        return format!(
            "missing privileges: {}",
            perms.missing_permissions.join(", ")
        );
    }
    "health check failed".to_string()
}

/// Step ids are fixed at construction, so a tracking error means a
/// programming mistake; log it instead of failing the pipeline.
fn track(result: BootstrapResult<()>) {
    if let Err(err) = result {
        warn!(%err, "progress tracking error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::{FakeExecutor, FakeResponse};
    use crate::executor::{Row, SqlValue};
    use std::fs;

    fn fake_with_grants(grant: &str) -> FakeExecutor {
        let fake = FakeExecutor::new();
        fake.when(
            "select version()",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "version",
                SqlValue::from("8.0.32"),
            )])]),
        );
        fake.when(
            "select current_user()",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "identity",
                SqlValue::from("root@localhost"),
            )])]),
        );
        fake.when(
            "show grants",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "Grants for root@localhost",
                SqlValue::from(grant),
            )])]),
        );
        fake.when(
            "information_schema.schemata",
            FakeResponse::Rows(vec![Row::from_pairs(vec![
                ("charset", SqlValue::from("utf8mb4")),
                ("collation", SqlValue::from("utf8mb4_unicode_ci")),
            ])]),
        );
        fake
    }

    fn healthy_fake() -> FakeExecutor {
        fake_with_grants("GRANT ALL PRIVILEGES ON *.* TO 'root'@'localhost'")
    }

    fn test_config(migrations_dir: &Path) -> BootstrapConfig {
        BootstrapConfig {
            database_url: "mysql://root@localhost/app".to_string(),
            retry_attempts: 1,
            retry_delay: Duration::ZERO,
            migrations_dir: migrations_dir.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    fn migrations_dir_with_script() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("01-users.sql"),
            "CREATE TABLE users (id INT);",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn healthy_pipeline_completes() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Completed);
        assert!(report.health.as_ref().unwrap().is_healthy);
        assert!(report.provision.as_ref().unwrap().succeeded());
        assert_eq!(report.migrations.as_ref().unwrap().executed, 1);
        assert!(report.summary.is_fully_successful());
        assert_eq!(fake.tracked_count(), 1);
    }

    #[tokio::test]
    async fn second_call_returns_the_memoized_report() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(fake.clone()));

        let first = orchestrator.ensure_initialized().await.unwrap();
        let second = orchestrator.ensure_initialized().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.ping_attempts(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(fake.clone()));

        let (a, b) = tokio::join!(
            orchestrator.ensure_initialized(),
            orchestrator.ensure_initialized()
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fake.ping_attempts(), 1);
    }

    #[tokio::test]
    async fn disabled_bootstrap_is_skipped() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let config = BootstrapConfig {
            auto_init: false,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Skipped);
        assert!(report.health.is_none());
        assert_eq!(fake.ping_attempts(), 0);
    }

    #[tokio::test]
    async fn production_opt_out_skips_bootstrap() {
        let dir = migrations_dir_with_script();
        let config = BootstrapConfig {
            environment: Environment::Production,
            skip_in_production: true,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(healthy_fake()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Skipped);
    }

    #[tokio::test]
    async fn unhealthy_with_continue_degrades() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.fail_pings(1);
        let config = BootstrapConfig {
            fallback_behavior: FallbackBehavior::Continue,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Degraded);
        assert!(report.is_operational());
        // Provisioning and migrations ran before the failing health verdict.
        assert!(report.provision.as_ref().unwrap().succeeded());
        assert_eq!(report.migrations.as_ref().unwrap().executed, 1);
        assert_eq!(fake.tracked_count(), 1);
    }

    #[tokio::test]
    async fn limited_grants_degrade_after_provisioning_and_migrations() {
        let dir = migrations_dir_with_script();
        let fake = fake_with_grants("GRANT SELECT, INSERT ON *.* TO 'app'@'%'");
        let config = BootstrapConfig {
            fallback_behavior: FallbackBehavior::Continue,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Degraded);
        assert!(report.provision.as_ref().unwrap().succeeded());
        assert_eq!(report.migrations.as_ref().unwrap().executed, 1);
        assert_eq!(fake.tracked_count(), 1);

        let health = report.health.as_ref().unwrap();
        assert!(!health.is_healthy);
        assert!(!health
            .permissions
            .as_ref()
            .unwrap()
            .missing_permissions
            .is_empty());

        // The health verdict comes last, after the work it judges.
        let names: Vec<&str> = report
            .summary
            .operations
            .iter()
            .map(|op| op.name.as_str())
            .collect();
        assert_eq!(names, vec!["provisioning", "migrations", "health_check"]);
    }

    #[tokio::test]
    async fn migration_time_budget_expires_between_scripts() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let config = BootstrapConfig {
            migration_timeout: Duration::ZERO,
            fallback_behavior: FallbackBehavior::Continue,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Degraded);
        assert!(report.migrations.is_none());
        assert_eq!(fake.tracked_count(), 0);
        // The deadline is checked before a script starts, so the health
        // probe still runs and passes.
        assert!(report.health.as_ref().unwrap().is_healthy);

        let migrations_op = report
            .summary
            .operations
            .iter()
            .find(|op| op.name == "migrations")
            .unwrap();
        assert!(migrations_op.error.as_ref().unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn unhealthy_with_exit_fails_startup() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.fail_pings(1);
        let config = BootstrapConfig {
            fallback_behavior: FallbackBehavior::Exit,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake));

        assert!(orchestrator.ensure_initialized().await.is_err());
        let report = orchestrator.report().unwrap();
        assert_eq!(report.outcome, StartupOutcome::Failed);
        assert!(!report.is_operational());
    }

    #[tokio::test]
    async fn retry_fallback_runs_the_pipeline_again() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.fail_pings(1);
        let config = BootstrapConfig {
            fallback_behavior: FallbackBehavior::Retry,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake.clone()));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Completed);
        assert!(report.retried);
        assert_eq!(fake.ping_attempts(), 2);
    }

    #[tokio::test]
    async fn health_check_timeout_degrades() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.fail_pings(10);
        let config = BootstrapConfig {
            retry_attempts: 10,
            retry_delay: Duration::from_secs(5),
            health_check_timeout: Duration::from_millis(20),
            fallback_behavior: FallbackBehavior::Continue,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Degraded);
        let health = report.health.as_ref().unwrap();
        assert!(!health.connection.connected);
    }

    #[tokio::test]
    async fn migration_failure_degrades_and_is_reported() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.when(
            "CREATE TABLE users",
            FakeResponse::Fail {
                message: "You have an error in your SQL syntax".to_string(),
                code: Some("1064".to_string()),
            },
        );
        let config = BootstrapConfig {
            fallback_behavior: FallbackBehavior::Continue,
            ..test_config(dir.path())
        };
        let orchestrator = StartupOrchestrator::new(config, Arc::new(fake));

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Degraded);
        assert_eq!(report.migrations.as_ref().unwrap().failed, 1);
        assert!(!report.summary.is_fully_successful());
    }

    #[tokio::test]
    async fn reset_allows_a_fresh_run() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        let mut orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(fake.clone()));

        orchestrator.ensure_initialized().await.unwrap();
        orchestrator.reset();
        assert!(orchestrator.report().is_none());
        orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(fake.ping_attempts(), 2);
    }

    #[tokio::test]
    async fn observers_see_every_stage_transition() {
        use crate::progress::ProgressStep;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        struct Recorder {
            transitions: AtomicUsize,
            last_percent: Mutex<f64>,
        }
        impl ProgressObserver for Recorder {
            fn on_transition(&self, _step: &ProgressStep, overall_percent: f64) {
                self.transitions.fetch_add(1, Ordering::SeqCst);
                *self.last_percent.lock().unwrap() = overall_percent;
            }
        }

        let dir = migrations_dir_with_script();
        let recorder = Arc::new(Recorder {
            transitions: AtomicUsize::new(0),
            last_percent: Mutex::new(0.0),
        });
        let orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(healthy_fake()))
                .with_progress_observer(recorder.clone());

        orchestrator.ensure_initialized().await.unwrap();
        // Three stages, each with a start and a terminal transition.
        assert_eq!(recorder.transitions.load(Ordering::SeqCst), 6);
        assert_eq!(*recorder.last_percent.lock().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn schema_validation_runs_when_expectations_are_set() {
        let dir = migrations_dir_with_script();
        let fake = healthy_fake();
        fake.when(
            "information_schema.tables",
            FakeResponse::Rows(vec![Row::from_pairs(vec![(
                "TABLE_NAME",
                SqlValue::from("users"),
            )])]),
        );
        fake.when(
            "information_schema.columns",
            FakeResponse::Rows(vec![Row::from_pairs(vec![
                ("COLUMN_NAME", SqlValue::from("id")),
                ("DATA_TYPE", SqlValue::from("int")),
            ])]),
        );

        let expected = ExpectedSchema::new().table("users", &[("id", "int")]);
        let orchestrator =
            StartupOrchestrator::new(test_config(dir.path()), Arc::new(fake.clone()))
                .with_expected_schema(expected);

        let report = orchestrator.ensure_initialized().await.unwrap();
        assert_eq!(report.outcome, StartupOutcome::Completed);
        let schema = report.schema.as_ref().unwrap();
        assert!(schema.recommendations.is_empty());
    }
}

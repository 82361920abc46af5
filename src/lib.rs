//! # db-bootstrap: Startup Database Bootstrap
//!
//! Automates the bootstrap of a relational database at process startup:
//! connectivity probing with retries, idempotent database/user provisioning,
//! versioned SQL migrations tracked by content checksum, and a structured
//! health/initialization report.
//!
//! Every database-facing component talks to the [`executor::QueryExecutor`]
//! trait, so the whole pipeline can be driven against the real MySQL driver
//! or the in-memory [`executor::fake::FakeExecutor`] in tests.

pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod logging;
pub mod migrations;
pub mod orchestrator;
pub mod progress;
pub mod provision;
pub mod report;
pub mod schema;

pub use classify::{CategorizedError, ErrorCategory, ErrorClassifier, ErrorSeverity};
pub use config::{BootstrapConfig, Environment, FallbackBehavior, LogFormat, LogLevel};
pub use error::{BootstrapError, BootstrapResult};
pub use executor::{ExecutorTransaction, QueryExecutor, Row, SqlValue};
pub use health::{ConnectionHealthProber, HealthCheckResult};
pub use migrations::{MigrationEngine, MigrationOptions, MigrationRunResult};
pub use orchestrator::{StartupOrchestrator, StartupOutcome, StartupReport};
pub use progress::{ProgressObserver, ProgressStep, ProgressTracker, StepStatus};
pub use provision::{ProvisionOptions, ProvisionReport, Provisioner};
pub use report::{OperationOutcome, OperationStatus, ReportFormat, SummaryReporter};
pub use schema::{ExpectedSchema, SchemaDetector, SchemaReport};

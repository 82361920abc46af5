//! Core migration types shared by discovery and the runner.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Order assigned to scripts without a numeric filename prefix.
///
/// Unprefixed scripts sort after every prefixed script and then
/// alphabetically among themselves.
pub const UNORDERED_SENTINEL: u32 = u32::MAX;

/// A discovered migration script, content loaded and checksummed.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub filename: String,
    pub order: u32,
    pub content: String,
    /// Lowercase hex sha-256 of the raw file content.
    pub checksum: String,
}

impl MigrationScript {
    pub fn has_order_prefix(&self) -> bool {
        self.order != UNORDERED_SENTINEL
    }
}

/// A row from the tracking table describing a past execution attempt.
///
/// Only the latest attempt per script is kept; the table is upserted on
/// script name.
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub script_name: String,
    pub checksum: String,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub success: bool,
}

/// Why a script was selected for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionReason {
    NeverRun,
    PreviousFailure,
    ChecksumChanged,
}

/// Outcome of comparing a discovered script against the tracking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDecision {
    Execute(ExecutionReason),
    /// Already executed successfully with an identical checksum.
    AlreadyApplied,
    /// Excluded by the skip list or skip pattern.
    Excluded,
}

/// Result of a single script run (or dry-run preview).
#[derive(Debug, Clone, Serialize)]
pub struct ScriptResult {
    pub filename: String,
    pub executed: bool,
    pub success: bool,
    pub reason: Option<ExecutionReason>,
    pub skipped: bool,
    pub statements: usize,
    pub affected_rows: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ScriptResult {
    pub(crate) fn skipped(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            executed: false,
            success: true,
            reason: None,
            skipped: true,
            statements: 0,
            affected_rows: 0,
            duration_ms: 0,
            error: None,
            warnings: Vec::new(),
        }
    }
}

/// An ordering or naming problem found during discovery validation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub message: String,
    pub remediation: String,
}

/// Aggregate outcome of a full migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunResult {
    pub discovered: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub results: Vec<ScriptResult>,
    pub validation_issues: Vec<ValidationIssue>,
    pub total_duration_ms: u64,
}

impl MigrationRunResult {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Tunables for a migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Report what would execute without touching the database.
    pub dry_run: bool,
    /// Continue past a failed script instead of aborting the batch.
    pub skip_failed_scripts: bool,
    /// Exact filenames to exclude.
    pub skip_scripts: Vec<String>,
    /// Regex matched against filenames to exclude.
    pub skip_pattern: Option<String>,
    /// Treat ordering problems (duplicate prefixes, missing prefixes) as
    /// fatal instead of warnings.
    pub strict_ordering: bool,
    /// Per-file size ceiling in bytes.
    pub max_script_bytes: u64,
    /// Wall-clock budget for the whole batch, checked between scripts so
    /// an in-flight transaction is never interrupted.
    pub time_budget: Option<Duration>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_failed_scripts: false,
            skip_scripts: Vec::new(),
            skip_pattern: None,
            strict_ordering: false,
            max_script_bytes: 1024 * 1024,
            time_budget: None,
        }
    }
}

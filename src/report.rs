//! Summary reporting
//!
//! Accumulates per-operation outcomes across a bootstrap run and renders a
//! final report as text, Markdown, JSON, or CSV. Built once at the end of a
//! run; read-only thereafter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::memory_usage_bytes;

/// Outcome of one timed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failure,
    Partial,
    Skipped,
}

/// One accumulated operation result
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub name: String,
    pub status: OperationStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counts across operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationTotals {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub partial: usize,
    pub skipped: usize,
}

/// Timing and memory statistics for the whole run
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub average_operation_ms: u64,
    pub min_operation_ms: u64,
    pub max_operation_ms: u64,
    pub memory_start_bytes: Option<u64>,
    pub memory_end_bytes: Option<u64>,
    /// Positive when the process grew during the run
    pub memory_delta_bytes: Option<i64>,
}

/// The final, immutable report
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub operations: Vec<OperationOutcome>,
    pub totals: OperationTotals,
    pub metrics: PerformanceMetrics,
    pub configuration: HashMap<String, String>,
    pub recommendations: Vec<String>,
}

/// Output format for [`SummaryReport::render`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
    Csv,
}

impl SummaryReport {
    pub fn is_fully_successful(&self) -> bool {
        self.totals.failed == 0 && self.totals.partial == 0
    }

    /// Render the report in the requested format
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.render_text(),
            ReportFormat::Markdown => self.render_markdown(),
            ReportFormat::Json => serde_json::to_string_pretty(self)
                .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e)),
            ReportFormat::Csv => self.render_csv(),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Database Bootstrap Summary\n");
        out.push_str("==========================\n");
        out.push_str(&format!(
            "Operations: {} total, {} succeeded, {} failed, {} partial, {} skipped\n",
            self.totals.total,
            self.totals.succeeded,
            self.totals.failed,
            self.totals.partial,
            self.totals.skipped
        ));
        out.push_str(&format!(
            "Total time: {}ms (avg {}ms, min {}ms, max {}ms)\n",
            self.metrics.total_duration_ms,
            self.metrics.average_operation_ms,
            self.metrics.min_operation_ms,
            self.metrics.max_operation_ms
        ));
        if let Some(delta) = self.metrics.memory_delta_bytes {
            out.push_str(&format!("Memory delta: {} bytes\n", delta));
        }
        out.push('\n');
        for op in &self.operations {
            out.push_str(&format!(
                "  {:<30} {:<8} {:>8}ms{}\n",
                op.name,
                format!("{:?}", op.status),
                op.duration_ms,
                op.error
                    .as_ref()
                    .map(|e| format!("  ({})", e))
                    .unwrap_or_default()
            ));
            for warning in &op.warnings {
                out.push_str(&format!("    warning: {}\n", warning));
            }
        }
        if !self.recommendations.is_empty() {
            out.push_str("\nRecommendations:\n");
            for rec in &self.recommendations {
                out.push_str(&format!("  - {}\n", rec));
            }
        }
        out
    }

    fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Database Bootstrap Summary\n\n");
        out.push_str("| Operation | Status | Duration (ms) | Error |\n");
        out.push_str("|---|---|---|---|\n");
        for op in &self.operations {
            out.push_str(&format!(
                "| {} | {:?} | {} | {} |\n",
                op.name,
                op.status,
                op.duration_ms,
                op.error.as_deref().unwrap_or("-")
            ));
        }
        out.push_str(&format!(
            "\n**Totals:** {} operations, {} failed, {}ms\n",
            self.totals.total, self.totals.failed, self.metrics.total_duration_ms
        ));
        if !self.recommendations.is_empty() {
            out.push_str("\n## Recommendations\n\n");
            for rec in &self.recommendations {
                out.push_str(&format!("- {}\n", rec));
            }
        }
        out
    }

    fn render_csv(&self) -> String {
        let mut out = String::from("name,status,duration_ms,error\n");
        for op in &self.operations {
            out.push_str(&format!(
                "{},{:?},{},{}\n",
                csv_escape(&op.name),
                op.status,
                op.duration_ms,
                csv_escape(op.error.as_deref().unwrap_or(""))
            ));
        }
        out
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Accumulates operation outcomes; [`SummaryReporter::finalize`] produces the
/// immutable [`SummaryReport`].
pub struct SummaryReporter {
    operations: Vec<OperationOutcome>,
    configuration: HashMap<String, String>,
    memory_start: Option<u64>,
    started_at: Instant,
}

impl SummaryReporter {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            configuration: HashMap::new(),
            memory_start: memory_usage_bytes(),
            started_at: Instant::now(),
        }
    }

    /// Snapshot the effective configuration into the report
    pub fn with_configuration(mut self, configuration: HashMap<String, String>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn record_success(&mut self, name: &str, duration: Duration) {
        self.record(name, OperationStatus::Success, duration, None, Vec::new());
    }

    pub fn record_failure(&mut self, name: &str, duration: Duration, error: &str) {
        self.record(
            name,
            OperationStatus::Failure,
            duration,
            Some(error.to_string()),
            Vec::new(),
        );
    }

    pub fn record_partial(&mut self, name: &str, duration: Duration, warnings: Vec<String>) {
        self.record(name, OperationStatus::Partial, duration, None, warnings);
    }

    pub fn record_skipped(&mut self, name: &str, reason: &str) {
        self.record(
            name,
            OperationStatus::Skipped,
            Duration::ZERO,
            None,
            vec![reason.to_string()],
        );
    }

    pub fn record(
        &mut self,
        name: &str,
        status: OperationStatus,
        duration: Duration,
        error: Option<String>,
        warnings: Vec<String>,
    ) {
        self.operations.push(OperationOutcome {
            name: name.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            error,
            warnings,
            recorded_at: Utc::now(),
        });
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Build the final report; the reporter is consumed
    pub fn finalize(self) -> SummaryReport {
        let totals = OperationTotals {
            total: self.operations.len(),
            succeeded: self.count(OperationStatus::Success),
            failed: self.count(OperationStatus::Failure),
            partial: self.count(OperationStatus::Partial),
            skipped: self.count(OperationStatus::Skipped),
        };

        let timed: Vec<u64> = self
            .operations
            .iter()
            .filter(|op| op.status != OperationStatus::Skipped)
            .map(|op| op.duration_ms)
            .collect();
        let memory_end = memory_usage_bytes();
        let metrics = PerformanceMetrics {
            total_duration_ms: self.started_at.elapsed().as_millis() as u64,
            average_operation_ms: if timed.is_empty() {
                0
            } else {
                timed.iter().sum::<u64>() / timed.len() as u64
            },
            min_operation_ms: timed.iter().copied().min().unwrap_or(0),
            max_operation_ms: timed.iter().copied().max().unwrap_or(0),
            memory_start_bytes: self.memory_start,
            memory_end_bytes: memory_end,
            memory_delta_bytes: match (self.memory_start, memory_end) {
                (Some(start), Some(end)) => Some(end as i64 - start as i64),
                _ => None,
            },
        };

        let recommendations = derive_recommendations(&totals, &metrics, &self.operations);

        SummaryReport {
            generated_at: Utc::now(),
            operations: self.operations,
            totals,
            metrics,
            configuration: self.configuration,
            recommendations,
        }
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.operations
            .iter()
            .filter(|op| op.status == status)
            .count()
    }
}

impl Default for SummaryReporter {
    fn default() -> Self {
        Self::new()
    }
}

const SLOW_AVERAGE_MS: u64 = 5_000;
const MEMORY_GROWTH_BYTES: i64 = 100 * 1024 * 1024;

fn derive_recommendations(
    totals: &OperationTotals,
    metrics: &PerformanceMetrics,
    operations: &[OperationOutcome],
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if totals.failed > 0 {
        recommendations.push(format!(
            "{} operation(s) failed; review the errors above before relying on this database",
            totals.failed
        ));
    }
    if metrics.average_operation_ms > SLOW_AVERAGE_MS {
        recommendations.push(format!(
            "Average operation time was {}ms; investigate slow statements or network latency",
            metrics.average_operation_ms
        ));
    }
    if let Some(delta) = metrics.memory_delta_bytes {
        if delta > MEMORY_GROWTH_BYTES {
            recommendations.push(format!(
                "Process memory grew by {} bytes during bootstrap; check for oversized migration scripts",
                delta
            ));
        }
    }
    if operations.iter().any(|op| !op.warnings.is_empty()) {
        recommendations
            .push("Warnings were reported; see the per-operation details".to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reporter() -> SummaryReporter {
        let mut reporter = SummaryReporter::new();
        reporter.record_success("provision", Duration::from_millis(120));
        reporter.record_failure("migrate", Duration::from_millis(340), "syntax error");
        reporter.record_skipped("health_check", "disabled");
        reporter
    }

    #[test]
    fn totals_are_counted_by_status() {
        let report = sample_reporter().finalize();
        assert_eq!(report.totals.total, 3);
        assert_eq!(report.totals.succeeded, 1);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.skipped, 1);
        assert!(!report.is_fully_successful());
    }

    #[test]
    fn skipped_operations_excluded_from_timing() {
        let report = sample_reporter().finalize();
        assert_eq!(report.metrics.min_operation_ms, 120);
        assert_eq!(report.metrics.max_operation_ms, 340);
        assert_eq!(report.metrics.average_operation_ms, 230);
    }

    #[test]
    fn failure_produces_a_recommendation() {
        let report = sample_reporter().finalize();
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("failed")));
    }

    #[test]
    fn json_rendering_is_valid() {
        let report = sample_reporter().finalize();
        let json = report.render(ReportFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["totals"]["total"], 3);
    }

    #[test]
    fn csv_rendering_has_header_and_rows() {
        let report = sample_reporter().finalize();
        let csv = report.render(ReportFormat::Csv);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "name,status,duration_ms,error");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        let mut reporter = SummaryReporter::new();
        reporter.record_failure("op", Duration::ZERO, "bad, \"quoted\" value");
        let csv = reporter.finalize().render(ReportFormat::Csv);
        assert!(csv.contains("\"bad, \"\"quoted\"\" value\""));
    }

    #[test]
    fn markdown_contains_table_and_totals() {
        let report = sample_reporter().finalize();
        let md = report.render(ReportFormat::Markdown);
        assert!(md.contains("| Operation | Status |"));
        assert!(md.contains("**Totals:**"));
    }

    #[test]
    fn configuration_snapshot_is_carried() {
        let mut config = HashMap::new();
        config.insert("environment".to_string(), "Development".to_string());
        let reporter = SummaryReporter::new().with_configuration(config);
        let report = reporter.finalize();
        assert_eq!(report.configuration.get("environment").unwrap(), "Development");
    }
}

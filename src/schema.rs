//! Schema drift detection
//!
//! Introspects the live database through information_schema and diffs it
//! against an expected table/column shape. Recommendations are generated
//! from the diff, never hand-authored per deployment.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::BootstrapResult;
use crate::executor::{QueryExecutor, SqlValue};

/// Expected shape of one column
#[derive(Debug, Clone)]
pub struct ExpectedColumn {
    pub name: String,
    pub data_type: String,
}

/// Expected shape of one table
#[derive(Debug, Clone)]
pub struct ExpectedTable {
    pub name: String,
    pub columns: Vec<ExpectedColumn>,
}

/// The schema the application expects to find
#[derive(Debug, Clone, Default)]
pub struct ExpectedSchema {
    pub tables: Vec<ExpectedTable>,
}

impl ExpectedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.tables.push(ExpectedTable {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(col, ty)| ExpectedColumn {
                    name: col.to_string(),
                    data_type: ty.to_string(),
                })
                .collect(),
        });
        self
    }

    fn table_names(&self) -> HashSet<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}

/// Type-compatibility policy: a pragmatic allowlist of interchangeable
/// column types, configurable rather than a hard correctness rule.
#[derive(Debug, Clone)]
pub struct TypeCompatibility {
    groups: Vec<Vec<String>>,
}

impl Default for TypeCompatibility {
    fn default() -> Self {
        let groups = vec![
            vec!["tinyint", "smallint", "mediumint", "int", "integer", "bigint"],
            vec!["enum", "varchar", "char"],
            vec!["tinytext", "text", "mediumtext", "longtext"],
            vec!["datetime", "timestamp"],
            vec!["float", "double", "decimal"],
        ];
        Self {
            groups: groups
                .into_iter()
                .map(|g| g.into_iter().map(String::from).collect())
                .collect(),
        }
    }
}

impl TypeCompatibility {
    pub fn with_group(mut self, group: &[&str]) -> Self {
        self.groups
            .push(group.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Are two declared column types interchangeable under this policy?
    pub fn compatible(&self, expected: &str, actual: &str) -> bool {
        let expected = normalize_type(expected);
        let actual = normalize_type(actual);
        if expected == actual {
            return true;
        }
        self.groups
            .iter()
            .any(|group| group.contains(&expected) && group.contains(&actual))
    }
}

/// Strip length suffixes and modifiers: `VARCHAR(255)` -> `varchar`,
/// `INT UNSIGNED` -> `int`
fn normalize_type(ty: &str) -> String {
    let lowered = ty.to_lowercase();
    let base = lowered.split('(').next().unwrap_or(&lowered);
    base.replace("unsigned", "").trim().to_string()
}

/// Kinds of column-level drift
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnIssueKind {
    Missing,
    Extra,
    TypeMismatch { expected: String, actual: String },
}

/// One column-level finding
#[derive(Debug, Clone)]
pub struct ColumnIssue {
    pub table: String,
    pub column: String,
    pub kind: ColumnIssueKind,
}

/// Table-level diff between expected and actual
#[derive(Debug, Clone, Default)]
pub struct TableInventory {
    pub actual_tables: Vec<String>,
    pub missing_tables: Vec<String>,
    pub extra_tables: Vec<String>,
}

/// Overall classification of the detected schema state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaHealth {
    Healthy,
    NeedsAttention,
    Critical,
}

/// Result of one detection pass
#[derive(Debug, Clone)]
pub struct SchemaReport {
    pub database_exists: bool,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub inventory: Option<TableInventory>,
    pub column_issues: Vec<ColumnIssue>,
    pub health: SchemaHealth,
    /// Ranked, human-actionable remediation steps
    pub recommendations: Vec<String>,
}

/// Introspects the live schema and diffs it against the expected one
pub struct SchemaDetector {
    executor: Arc<dyn QueryExecutor>,
    database: String,
    expected: ExpectedSchema,
    compatibility: TypeCompatibility,
}

impl SchemaDetector {
    pub fn new(executor: Arc<dyn QueryExecutor>, database: &str, expected: ExpectedSchema) -> Self {
        Self {
            executor,
            database: database.to_string(),
            expected,
            compatibility: TypeCompatibility::default(),
        }
    }

    /// Override the type-compatibility policy
    pub fn with_compatibility(mut self, compatibility: TypeCompatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    /// Run the detection pass
    pub async fn detect(&self) -> BootstrapResult<SchemaReport> {
        let catalog = self
            .executor
            .fetch_optional(
                "SELECT DEFAULT_CHARACTER_SET_NAME AS charset, DEFAULT_COLLATION_NAME AS collation \
                 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                &[SqlValue::from(self.database.as_str())],
            )
            .await?;

        let Some(catalog_row) = catalog else {
            // No database: nothing further to introspect.
            tracing::warn!(database = %self.database, "target database does not exist");
            return Ok(SchemaReport {
                database_exists: false,
                charset: None,
                collation: None,
                inventory: None,
                column_issues: Vec::new(),
                health: SchemaHealth::Critical,
                recommendations: vec![format!(
                    "Create database `{}` (run provisioning or CREATE DATABASE manually)",
                    self.database
                )],
            });
        };

        let charset = catalog_row.try_get_str("charset");
        let collation = catalog_row.try_get_str("collation");

        let inventory = self.table_inventory().await?;
        let column_issues = self.column_issues(&inventory).await?;

        let health = if !inventory.missing_tables.is_empty() {
            SchemaHealth::Critical
        } else if !column_issues.is_empty() || !inventory.extra_tables.is_empty() {
            SchemaHealth::NeedsAttention
        } else {
            SchemaHealth::Healthy
        };

        let recommendations = build_recommendations(&self.database, &inventory, &column_issues);

        Ok(SchemaReport {
            database_exists: true,
            charset,
            collation,
            inventory: Some(inventory),
            column_issues,
            health,
            recommendations,
        })
    }

    async fn table_inventory(&self) -> BootstrapResult<TableInventory> {
        let rows = self
            .executor
            .fetch_all(
                "SELECT TABLE_NAME AS table_name FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
                &[SqlValue::from(self.database.as_str())],
            )
            .await?;

        let actual: Vec<String> = rows
            .iter()
            .filter_map(|row| row.try_get_str("table_name"))
            .collect();
        let actual_set: HashSet<String> = actual.iter().cloned().collect();
        let expected_set = self.expected.table_names();

        let mut missing: Vec<String> = self
            .expected
            .tables
            .iter()
            .map(|t| t.name.clone())
            .filter(|name| !actual_set.contains(name))
            .collect();
        missing.sort();
        let mut extra: Vec<String> = actual
            .iter()
            .filter(|name| !expected_set.contains(*name))
            .cloned()
            .collect();
        extra.sort();

        Ok(TableInventory {
            actual_tables: actual,
            missing_tables: missing,
            extra_tables: extra,
        })
    }

    async fn column_issues(&self, inventory: &TableInventory) -> BootstrapResult<Vec<ColumnIssue>> {
        let actual_set: HashSet<&String> = inventory.actual_tables.iter().collect();
        let mut issues = Vec::new();

        for table in &self.expected.tables {
            if !actual_set.contains(&table.name) {
                continue;
            }
            let rows = self
                .executor
                .fetch_all(
                    "SELECT COLUMN_NAME AS column_name, DATA_TYPE AS data_type \
                     FROM information_schema.COLUMNS \
                     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                    &[
                        SqlValue::from(self.database.as_str()),
                        SqlValue::from(table.name.as_str()),
                    ],
                )
                .await?;

            let actual_columns: Vec<(String, String)> = rows
                .iter()
                .filter_map(|row| {
                    Some((
                        row.try_get_str("column_name")?,
                        row.try_get_str("data_type")?,
                    ))
                })
                .collect();
            let expected_names: HashSet<&String> =
                table.columns.iter().map(|c| &c.name).collect();

            for expected in &table.columns {
                match actual_columns
                    .iter()
                    .find(|(name, _)| *name == expected.name)
                {
                    None => issues.push(ColumnIssue {
                        table: table.name.clone(),
                        column: expected.name.clone(),
                        kind: ColumnIssueKind::Missing,
                    }),
                    Some((_, actual_type)) => {
                        if !self.compatibility.compatible(&expected.data_type, actual_type) {
                            issues.push(ColumnIssue {
                                table: table.name.clone(),
                                column: expected.name.clone(),
                                kind: ColumnIssueKind::TypeMismatch {
                                    expected: expected.data_type.clone(),
                                    actual: actual_type.clone(),
                                },
                            });
                        }
                    }
                }
            }
            for (name, _) in &actual_columns {
                if !expected_names.contains(name) {
                    issues.push(ColumnIssue {
                        table: table.name.clone(),
                        column: name.clone(),
                        kind: ColumnIssueKind::Extra,
                    });
                }
            }
        }
        Ok(issues)
    }
}

/// Rank remediation: structural gaps first, then column fixes, then cleanup
fn build_recommendations(
    database: &str,
    inventory: &TableInventory,
    issues: &[ColumnIssue],
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if !inventory.missing_tables.is_empty() {
        recommendations.push(format!(
            "Create missing table(s) in `{}`: {} (re-run migrations)",
            database,
            inventory.missing_tables.join(", ")
        ));
    }
    let missing_columns: Vec<String> = issues
        .iter()
        .filter(|i| i.kind == ColumnIssueKind::Missing)
        .map(|i| format!("{}.{}", i.table, i.column))
        .collect();
    if !missing_columns.is_empty() {
        recommendations.push(format!(
            "Add missing column(s): {}",
            missing_columns.join(", ")
        ));
    }
    for issue in issues {
        if let ColumnIssueKind::TypeMismatch { expected, actual } = &issue.kind {
            recommendations.push(format!(
                "Fix column type of {}.{}: expected {}, found {}",
                issue.table, issue.column, expected, actual
            ));
        }
    }
    if !inventory.extra_tables.is_empty() {
        recommendations.push(format!(
            "Review unexpected table(s): {}",
            inventory.extra_tables.join(", ")
        ));
    }
    recommendations
}

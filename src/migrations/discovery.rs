//! Filesystem discovery of migration scripts.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::definitions::{MigrationScript, ValidationIssue, UNORDERED_SENTINEL};
use crate::error::{BootstrapError, BootstrapResult};

/// Scans `dir` for `*.sql` files, loads and checksums each one, and returns
/// the scripts sorted by numeric order prefix, then filename.
///
/// Files larger than `max_bytes` and files with empty or whitespace-only
/// content are rejected outright.
pub fn discover_scripts(dir: &Path, max_bytes: u64) -> BootstrapResult<Vec<MigrationScript>> {
    if !dir.is_dir() {
        return Err(BootstrapError::Migration(format!(
            "migrations directory not found: {}",
            dir.display()
        )));
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_sql = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("sql"))
            .unwrap_or(false);
        if !is_sql {
            continue;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let size = entry.metadata()?.len();
        if size > max_bytes {
            return Err(BootstrapError::Migration(format!(
                "script {} is {} bytes, exceeding the {} byte ceiling",
                filename, size, max_bytes
            )));
        }

        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Err(BootstrapError::Migration(format!(
                "script {} is empty",
                filename
            )));
        }

        let checksum = content_checksum(&content);
        let order = parse_order_prefix(&filename);
        scripts.push(MigrationScript {
            filename,
            order,
            content,
            checksum,
        });
    }

    scripts.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.filename.cmp(&b.filename)));
    Ok(scripts)
}

/// Lowercase hex sha-256 of the script content.
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts the leading numeric order prefix from `01-create-users.sql`
/// style filenames. Files without a prefix get [`UNORDERED_SENTINEL`].
pub(crate) fn parse_order_prefix(filename: &str) -> u32 {
    let digits: String = filename.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return UNORDERED_SENTINEL;
    }
    let rest = &filename[digits.len()..];
    if !rest.starts_with('-') && !rest.starts_with('_') {
        return UNORDERED_SENTINEL;
    }
    digits.parse().unwrap_or(UNORDERED_SENTINEL)
}

/// Checks a sorted script set for duplicate order prefixes and missing
/// prefixes. The caller decides whether issues are warnings or fatal.
pub fn validate_ordering(scripts: &[MigrationScript]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut by_order: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for script in scripts {
        if script.has_order_prefix() {
            by_order
                .entry(script.order)
                .or_default()
                .push(&script.filename);
        }
    }
    for (order, files) in &by_order {
        if files.len() > 1 {
            issues.push(ValidationIssue {
                message: format!(
                    "duplicate order prefix {:02}: {}",
                    order,
                    files.join(", ")
                ),
                remediation: "renumber the scripts so each prefix is unique".to_string(),
            });
        }
    }

    for script in scripts {
        if !script.has_order_prefix() {
            issues.push(ValidationIssue {
                message: format!("script {} has no numeric order prefix", script.filename),
                remediation: "rename the file to NN-description.sql to pin its position"
                    .to_string(),
            });
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn discovers_and_sorts_by_prefix_then_name() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "02-b.sql", "SELECT 2;");
        write_script(dir.path(), "00-a.sql", "SELECT 0;");
        write_script(dir.path(), "01-c.sql", "SELECT 1;");
        write_script(dir.path(), "notes.txt", "not a script");

        let scripts = discover_scripts(dir.path(), 1024).unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["00-a.sql", "01-c.sql", "02-b.sql"]);
    }

    #[test]
    fn unprefixed_scripts_sort_last_alphabetically() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "zeta.sql", "SELECT 1;");
        write_script(dir.path(), "alpha.sql", "SELECT 1;");
        write_script(dir.path(), "01-first.sql", "SELECT 1;");

        let scripts = discover_scripts(dir.path(), 1024).unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["01-first.sql", "alpha.sql", "zeta.sql"]);
        assert_eq!(scripts[1].order, UNORDERED_SENTINEL);
    }

    #[test]
    fn rejects_empty_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-empty.sql", "   \n\t  ");
        let err = discover_scripts(dir.path(), 1024).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_oversized_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-big.sql", &"x".repeat(64));
        let err = discover_scripts(dir.path(), 16).unwrap_err();
        assert!(err.to_string().contains("ceiling"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = discover_scripts(Path::new("/nonexistent/migrations"), 1024).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let a = content_checksum("CREATE TABLE t (id INT);");
        let b = content_checksum("CREATE TABLE t (id INT);");
        let c = content_checksum("CREATE TABLE t (id BIGINT);");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn order_prefix_parsing() {
        assert_eq!(parse_order_prefix("01-users.sql"), 1);
        assert_eq!(parse_order_prefix("12_data.sql"), 12);
        assert_eq!(parse_order_prefix("users.sql"), UNORDERED_SENTINEL);
        assert_eq!(parse_order_prefix("01users.sql"), UNORDERED_SENTINEL);
    }

    #[test]
    fn ordering_validation_flags_duplicates_and_missing_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "01-a.sql", "SELECT 1;");
        write_script(dir.path(), "01-b.sql", "SELECT 1;");
        write_script(dir.path(), "loose.sql", "SELECT 1;");

        let scripts = discover_scripts(dir.path(), 1024).unwrap();
        let issues = validate_ordering(&scripts);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("duplicate order prefix 01"));
        assert!(issues[1].message.contains("no numeric order prefix"));
    }
}

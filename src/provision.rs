//! Database and user provisioning
//!
//! Idempotent: an existing database only gets its charset/collation corrected,
//! an existing user is never re-created, and the grant is always re-issued.
//! A final verification pass re-queries everything independently instead of
//! trusting the create/grant return values, so partial failures (grant ok,
//! flush failed) stay observable.

use std::sync::Arc;

use crate::classify::ErrorClassifier;
use crate::executor::{QueryExecutor, SqlValue};
use crate::health::parse_grant_statement;

/// Application user to provision alongside the database
#[derive(Debug, Clone)]
pub struct UserSpec {
    pub username: String,
    /// Host wildcard for the grantee, e.g. `%` or `10.0.%`
    pub host: String,
    pub password: String,
    pub privileges: Vec<String>,
}

/// What to provision
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub database: String,
    pub charset: String,
    pub collation: String,
    /// None skips user provisioning entirely
    pub user: Option<UserSpec>,
}

/// Outcome of the database step
#[derive(Debug, Clone, Default)]
pub struct DatabaseResult {
    pub existed: bool,
    pub created: bool,
    pub charset_corrected: bool,
    pub error: Option<String>,
}

/// Outcome of the user step
#[derive(Debug, Clone, Default)]
pub struct UserResult {
    pub existed: bool,
    pub created: bool,
    pub granted: bool,
    pub privileges_flushed: bool,
    pub error: Option<String>,
}

/// Independent re-check of the provisioned state
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub database_exists: bool,
    pub charset_matches: bool,
    pub collation_matches: bool,
    /// None when user provisioning was skipped
    pub user_exists: Option<bool>,
    pub privileges_granted: Option<bool>,
    pub overall_success: bool,
    pub recommendations: Vec<String>,
}

/// Full provisioning report
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub database: DatabaseResult,
    pub user: Option<UserResult>,
    pub verification: VerificationResult,
}

impl ProvisionReport {
    pub fn succeeded(&self) -> bool {
        self.verification.overall_success
    }
}

/// Idempotently creates the database and application user
pub struct Provisioner {
    executor: Arc<dyn QueryExecutor>,
    classifier: ErrorClassifier,
}

impl Provisioner {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Run provisioning; failures become structured results, never panics
    /// or raw errors
    pub async fn provision(&self, opts: &ProvisionOptions) -> ProvisionReport {
        let database = self.provision_database(opts).await;
        let user = match &opts.user {
            Some(spec) => Some(self.provision_user(opts, spec).await),
            None => None,
        };
        let verification = self.verify(opts).await;
        ProvisionReport {
            database,
            user,
            verification,
        }
    }

    async fn provision_database(&self, opts: &ProvisionOptions) -> DatabaseResult {
        let mut result = DatabaseResult::default();
        let existing = match self.query_catalog(&opts.database).await {
            Ok(row) => row,
            Err(err) => {
                let categorized = self.classifier.classify(&err, "provision_database", None);
                tracing::error!(error = %categorized, "failed to query database catalog");
                result.error = Some(categorized.to_string());
                return result;
            }
        };

        match existing {
            Some((charset, collation)) => {
                result.existed = true;
                if charset.as_deref() != Some(opts.charset.as_str())
                    || collation.as_deref() != Some(opts.collation.as_str())
                {
                    let sql = format!(
                        "ALTER DATABASE {} CHARACTER SET {} COLLATE {}",
                        quote_ident(&opts.database),
                        opts.charset,
                        opts.collation
                    );
                    match self.executor.execute(&sql, &[]).await {
                        Ok(_) => {
                            tracing::info!(database = %opts.database, "corrected charset/collation");
                            result.charset_corrected = true;
                        }
                        Err(err) => result.error = Some(err.to_string()),
                    }
                }
            }
            None => {
                let sql = format!(
                    "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
                    quote_ident(&opts.database),
                    opts.charset,
                    opts.collation
                );
                match self.executor.execute(&sql, &[]).await {
                    Ok(_) => {
                        tracing::info!(database = %opts.database, "database created");
                        result.created = true;
                    }
                    Err(err) => result.error = Some(err.to_string()),
                }
            }
        }
        result
    }

    async fn provision_user(&self, opts: &ProvisionOptions, spec: &UserSpec) -> UserResult {
        let mut result = UserResult::default();

        match self.user_exists(spec).await {
            Ok(true) => result.existed = true,
            Ok(false) => {
                let sql = format!(
                    "CREATE USER {} IDENTIFIED BY {}",
                    quote_grantee(&spec.username, &spec.host),
                    quote_string(&spec.password)
                );
                match self.executor.execute(&sql, &[]).await {
                    Ok(_) => {
                        tracing::info!(user = %spec.username, host = %spec.host, "user created");
                        result.created = true;
                    }
                    Err(err) => {
                        result.error = Some(err.to_string());
                        return result;
                    }
                }
            }
            Err(err) => {
                result.error = Some(err.to_string());
                return result;
            }
        }

        // The grant is re-issued even for an existing user, so privilege
        // drift self-heals on every boot.
        let grant_sql = format!(
            "GRANT {} ON {}.* TO {}",
            spec.privileges.join(", "),
            quote_ident(&opts.database),
            quote_grantee(&spec.username, &spec.host)
        );
        match self.executor.execute(&grant_sql, &[]).await {
            Ok(_) => result.granted = true,
            Err(err) => {
                result.error = Some(err.to_string());
                return result;
            }
        }

        match self.executor.execute("FLUSH PRIVILEGES", &[]).await {
            Ok(_) => result.privileges_flushed = true,
            Err(err) => result.error = Some(err.to_string()),
        }
        result
    }

    /// Independent verification: trusts only what it re-queries
    async fn verify(&self, opts: &ProvisionOptions) -> VerificationResult {
        let mut verification = VerificationResult::default();

        match self.query_catalog(&opts.database).await {
            Ok(Some((charset, collation))) => {
                verification.database_exists = true;
                verification.charset_matches = charset.as_deref() == Some(opts.charset.as_str());
                verification.collation_matches =
                    collation.as_deref() == Some(opts.collation.as_str());
            }
            Ok(None) | Err(_) => {}
        }

        if let Some(spec) = &opts.user {
            verification.user_exists = Some(self.user_exists(spec).await.unwrap_or(false));
            verification.privileges_granted =
                Some(self.privileges_granted(opts, spec).await.unwrap_or(false));
        }

        verification.overall_success = verification.database_exists
            && verification.charset_matches
            && verification.collation_matches
            && verification.user_exists.unwrap_or(true)
            && verification.privileges_granted.unwrap_or(true);

        if !verification.database_exists {
            verification.recommendations.push(format!(
                "Database `{}` is still missing; check CREATE privilege of the admin account",
                opts.database
            ));
        } else if !verification.charset_matches || !verification.collation_matches {
            verification.recommendations.push(format!(
                "Charset/collation of `{}` differs from {}/{}; run ALTER DATABASE manually",
                opts.database, opts.charset, opts.collation
            ));
        }
        if verification.user_exists == Some(false) {
            verification
                .recommendations
                .push("Application user was not created; check CREATE USER privilege".to_string());
        }
        if verification.privileges_granted == Some(false) {
            verification.recommendations.push(
                "Grants are not effective; re-run GRANT and FLUSH PRIVILEGES as an administrator"
                    .to_string(),
            );
        }
        verification
    }

    async fn query_catalog(
        &self,
        database: &str,
    ) -> crate::error::BootstrapResult<Option<(Option<String>, Option<String>)>> {
        let row = self
            .executor
            .fetch_optional(
                "SELECT DEFAULT_CHARACTER_SET_NAME AS charset, DEFAULT_COLLATION_NAME AS collation \
                 FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                &[SqlValue::from(database)],
            )
            .await?;
        Ok(row.map(|r| (r.try_get_str("charset"), r.try_get_str("collation"))))
    }

    async fn user_exists(&self, spec: &UserSpec) -> crate::error::BootstrapResult<bool> {
        let row = self
            .executor
            .fetch_optional(
                "SELECT COUNT(*) AS user_count FROM mysql.user WHERE user = ? AND host = ?",
                &[
                    SqlValue::from(spec.username.as_str()),
                    SqlValue::from(spec.host.as_str()),
                ],
            )
            .await?;
        Ok(match row {
            Some(row) => row.get_i64("user_count")? > 0,
            None => false,
        })
    }

    /// Effective privileges for the grantee, accepting either global (`*.*`)
    /// or schema-scoped grants
    async fn privileges_granted(
        &self,
        opts: &ProvisionOptions,
        spec: &UserSpec,
    ) -> crate::error::BootstrapResult<bool> {
        let sql = format!("SHOW GRANTS FOR {}", quote_grantee(&spec.username, &spec.host));
        let rows = self.executor.fetch_all(&sql, &[]).await?;

        let mut effective = std::collections::HashSet::new();
        let mut has_all = false;
        for row in &rows {
            let Some(line) = row.get_at(0).map(|v| v.render()) else {
                continue;
            };
            if !grant_applies_to(&line, &opts.database) {
                continue;
            }
            for privilege in parse_grant_statement(&line) {
                if privilege == "ALL PRIVILEGES" || privilege == "ALL" {
                    has_all = true;
                } else {
                    effective.insert(privilege);
                }
            }
        }
        Ok(spec
            .privileges
            .iter()
            .all(|p| has_all || effective.contains(&p.to_uppercase())))
    }
}

/// Does a `SHOW GRANTS` line apply globally or to the given schema?
fn grant_applies_to(line: &str, database: &str) -> bool {
    let upper = line.to_uppercase();
    let Some(on_index) = upper.find(" ON ") else {
        return false;
    };
    let target = &line[on_index + 4..];
    let target = target.split(" TO ").next().unwrap_or(target).trim();
    let normalized = target.replace(['`', '\''], "");
    normalized == "*.*" || normalized == format!("{}.*", database)
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn quote_grantee(user: &str, host: &str) -> String {
    format!("{}@{}", quote_string(user), quote_string(host))
}

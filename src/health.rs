//! Connection health probing
//!
//! Retries connectivity with a fixed delay, then gates on server version and
//! granted privileges. Connections are pool-managed by the executor, so they
//! are released on every exit path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::classify::{CategorizedError, ErrorClassifier};
use crate::config::parse_version;
use crate::error::BootstrapError;
use crate::executor::QueryExecutor;

/// Outcome of the connectivity retry loop
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Attempts actually made, including the successful one
    pub retry_attempts: u32,
    pub last_error: Option<String>,
}

/// Server version gate result
#[derive(Debug, Clone)]
pub struct VersionCheck {
    pub server_version: String,
    pub minimum_version: String,
    pub compatible: bool,
    pub reason: Option<String>,
}

/// Privilege gate result
#[derive(Debug, Clone)]
pub struct PermissionCheck {
    /// Each required privilege mapped to whether it is granted
    pub granted: HashMap<String, bool>,
    pub missing_permissions: Vec<String>,
    pub has_all_permissions: bool,
}

/// Aggregated result of one probe; created fresh per check, never persisted
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub connection: ConnectionStatus,
    pub identity: Option<String>,
    pub version: Option<VersionCheck>,
    pub permissions: Option<PermissionCheck>,
    pub errors: Vec<CategorizedError>,
    pub is_healthy: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// A synthetic failed result, used when the probe times out
    pub fn timed_out(timeout: Duration, classifier: &ErrorClassifier) -> Self {
        let err = BootstrapError::Timeout(timeout.as_millis() as u64);
        HealthCheckResult {
            connection: ConnectionStatus {
                connected: false,
                retry_attempts: 0,
                last_error: Some(err.to_string()),
            },
            identity: None,
            version: None,
            permissions: None,
            errors: vec![classifier.classify(&err, "health_check", None)],
            is_healthy: false,
            checked_at: Utc::now(),
        }
    }
}

/// Probe configuration
#[derive(Debug, Clone)]
pub struct HealthProberConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub min_server_version: String,
    pub required_privileges: Vec<String>,
}

impl Default for HealthProberConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(2),
            min_server_version: "8.0.0".to_string(),
            required_privileges: ["SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Known forks that report a MySQL-compatible wire protocol but are a
/// different product; rejected regardless of their numeric version.
const INCOMPATIBLE_PRODUCT_LABELS: &[&str] = &["mariadb", "tidb", "cockroachdb"];

/// Probes connectivity, server version, and effective privileges
pub struct ConnectionHealthProber {
    executor: Arc<dyn QueryExecutor>,
    config: HealthProberConfig,
    classifier: ErrorClassifier,
}

impl ConnectionHealthProber {
    pub fn new(executor: Arc<dyn QueryExecutor>, config: HealthProberConfig) -> Self {
        Self {
            executor,
            config,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Run the full probe: connect-with-retries, version gate, permission gate
    pub async fn probe(&self) -> HealthCheckResult {
        let mut errors = Vec::new();
        let connection = self.probe_connection(&mut errors).await;

        if !connection.connected {
            return HealthCheckResult {
                connection,
                identity: None,
                version: None,
                permissions: None,
                errors,
                is_healthy: false,
                checked_at: Utc::now(),
            };
        }

        let identity = self.current_identity(&mut errors).await;
        let version = self.check_version(&mut errors).await;
        let permissions = self.check_permissions(&mut errors).await;

        let version_ok = version.as_ref().map(|v| v.compatible).unwrap_or(false);
        let permissions_ok = permissions
            .as_ref()
            .map(|p| p.has_all_permissions)
            .unwrap_or(false);
        let is_healthy = connection.connected && version_ok && permissions_ok;

        HealthCheckResult {
            connection,
            identity,
            version,
            permissions,
            errors,
            is_healthy,
            checked_at: Utc::now(),
        }
    }

    async fn probe_connection(&self, errors: &mut Vec<CategorizedError>) -> ConnectionStatus {
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            match self.executor.ping().await {
                Ok(()) => {
                    tracing::debug!(attempt, "database connection established");
                    return ConnectionStatus {
                        connected: true,
                        retry_attempts: attempt,
                        last_error,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max = self.config.max_attempts,
                        error = %err,
                        "connection attempt failed"
                    );
                    last_error = Some(err.to_string());
                    if attempt == self.config.max_attempts {
                        errors.push(self.classifier.classify(&err, "connection_probe", None));
                    } else {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        ConnectionStatus {
            connected: false,
            retry_attempts: self.config.max_attempts,
            last_error,
        }
    }

    async fn current_identity(&self, errors: &mut Vec<CategorizedError>) -> Option<String> {
        match self
            .executor
            .fetch_optional("SELECT CURRENT_USER() AS identity", &[])
            .await
        {
            Ok(Some(row)) => row.try_get_str("identity"),
            Ok(None) => None,
            Err(err) => {
                errors.push(self.classifier.classify(&err, "identity_check", None));
                None
            }
        }
    }

    async fn check_version(&self, errors: &mut Vec<CategorizedError>) -> Option<VersionCheck> {
        let raw = match self.executor.server_version().await {
            Ok(Some(version)) => version,
            Ok(None) => return None,
            Err(err) => {
                errors.push(self.classifier.classify(&err, "version_check", None));
                return None;
            }
        };
        Some(self.evaluate_version(&raw))
    }

    fn evaluate_version(&self, raw: &str) -> VersionCheck {
        let lowered = raw.to_lowercase();
        if let Some(label) = INCOMPATIBLE_PRODUCT_LABELS
            .iter()
            .find(|label| lowered.contains(*label))
        {
            return VersionCheck {
                server_version: raw.to_string(),
                minimum_version: self.config.min_server_version.clone(),
                compatible: false,
                reason: Some(format!(
                    "server reports '{}', which is not MySQL even though the wire protocol matches",
                    label
                )),
            };
        }

        let actual = parse_version(raw);
        let minimum = parse_version(&self.config.min_server_version);
        match (actual, minimum) {
            (Some(actual), Some(minimum)) if actual >= minimum => VersionCheck {
                server_version: raw.to_string(),
                minimum_version: self.config.min_server_version.clone(),
                compatible: true,
                reason: None,
            },
            (Some(actual), Some(minimum)) => VersionCheck {
                server_version: raw.to_string(),
                minimum_version: self.config.min_server_version.clone(),
                compatible: false,
                reason: Some(format!(
                    "server version {}.{}.{} is below the required {}.{}.{}",
                    actual.0, actual.1, actual.2, minimum.0, minimum.1, minimum.2
                )),
            },
            _ => VersionCheck {
                server_version: raw.to_string(),
                minimum_version: self.config.min_server_version.clone(),
                compatible: false,
                reason: Some("could not parse server version".to_string()),
            },
        }
    }

    async fn check_permissions(
        &self,
        errors: &mut Vec<CategorizedError>,
    ) -> Option<PermissionCheck> {
        let rows = match self
            .executor
            .fetch_all("SHOW GRANTS FOR CURRENT_USER()", &[])
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                errors.push(self.classifier.classify(&err, "permission_check", None));
                return None;
            }
        };

        let mut granted_set = std::collections::HashSet::new();
        let mut has_all_grant = false;
        for row in &rows {
            let Some(grant) = row.get_at(0).map(|v| v.render()) else {
                continue;
            };
            for privilege in parse_grant_statement(&grant) {
                if privilege == "ALL PRIVILEGES" || privilege == "ALL" {
                    has_all_grant = true;
                } else {
                    granted_set.insert(privilege);
                }
            }
        }

        let mut granted = HashMap::new();
        let mut missing = Vec::new();
        for required in &self.config.required_privileges {
            let ok = has_all_grant || granted_set.contains(required);
            granted.insert(required.clone(), ok);
            if !ok {
                missing.push(required.clone());
            }
        }

        Some(PermissionCheck {
            granted,
            has_all_permissions: missing.is_empty(),
            missing_permissions: missing,
        })
    }
}

/// Pull the privilege list out of one `SHOW GRANTS` line, e.g.
/// `GRANT SELECT, INSERT ON *.* TO 'app'@'%'`
pub(crate) fn parse_grant_statement(grant: &str) -> Vec<String> {
    let upper = grant.to_uppercase();
    let Some(start) = upper.strip_prefix("GRANT ") else {
        return Vec::new();
    };
    let Some(on_index) = start.find(" ON ") else {
        return Vec::new();
    };
    start[..on_index]
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

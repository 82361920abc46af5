//! Error types for the bootstrap pipeline
//!
//! Low-level failures are wrapped into [`BootstrapError`] before they surface;
//! components convert these into structured result objects rather than letting
//! raw driver errors escape.

use thiserror::Error;

/// Result type alias for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Error type covering every stage of the bootstrap pipeline
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// Failed to reach or authenticate against the database server
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed at the server; carries the driver error code when known
    #[error("Query error: {message}")]
    Query {
        message: String,
        /// Driver-native error code (e.g. MySQL error number as a string)
        code: Option<String>,
    },

    /// Migration discovery, validation, or execution failure
    #[error("Migration error: {0}")]
    Migration(String),

    /// Database or user provisioning failure
    #[error("Provisioning error: {0}")]
    Provision(String),

    /// Schema introspection failure
    #[error("Schema error: {0}")]
    Schema(String),

    /// Health check failure
    #[error("Health check error: {0}")]
    HealthCheck(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its configured deadline
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Filesystem failure while reading migration scripts
    #[error("I/O error: {0}")]
    Io(String),
}

impl BootstrapError {
    /// Build a query error without a driver code
    pub fn query(message: impl Into<String>) -> Self {
        BootstrapError::Query {
            message: message.into(),
            code: None,
        }
    }

    /// Driver error code, when the failure originated at the server
    pub fn driver_code(&self) -> Option<&str> {
        match self {
            BootstrapError::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for BootstrapError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number().to_string());
                BootstrapError::Query {
                    message: db.message().to_string(),
                    code,
                }
            }
            sqlx::Error::PoolTimedOut => {
                BootstrapError::Connection("connection pool acquire timed out".to_string())
            }
            sqlx::Error::PoolClosed => {
                BootstrapError::Connection("connection pool is closed".to_string())
            }
            sqlx::Error::Io(io) => BootstrapError::Connection(io.to_string()),
            sqlx::Error::Tls(tls) => BootstrapError::Connection(tls.to_string()),
            _ => BootstrapError::query(err.to_string()),
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        BootstrapError::Io(err.to_string())
    }
}

impl From<regex::Error> for BootstrapError {
    fn from(err: regex::Error) -> Self {
        BootstrapError::Configuration(format!("invalid pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_helper_has_no_code() {
        let err = BootstrapError::query("boom");
        assert!(err.driver_code().is_none());
        assert_eq!(err.to_string(), "Query error: boom");
    }

    #[test]
    fn driver_code_only_on_query_variant() {
        let err = BootstrapError::Query {
            message: "denied".into(),
            code: Some("1045".into()),
        };
        assert_eq!(err.driver_code(), Some("1045"));
        assert!(BootstrapError::Connection("x".into()).driver_code().is_none());
    }
}

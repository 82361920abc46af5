//! Tracing subscriber setup for the bootstrap run
//!
//! Maps the configured [`LogLevel`]/[`LogFormat`] onto a `tracing-subscriber`
//! installation. Safe to call more than once; only the first call installs.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogLevel};

/// Translate the bootstrap log level into a tracing filter directive
fn filter_for(level: LogLevel) -> EnvFilter {
    let directive = match level {
        LogLevel::Silent => "off",
        LogLevel::Minimal => "warn",
        LogLevel::Detailed => "info",
        LogLevel::Verbose => "debug",
        LogLevel::Debug => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// Install a global tracing subscriber for the configured level and format.
///
/// Returns false when a subscriber was already installed (e.g. by the host
/// application), in which case the existing one is left in place.
pub fn init_tracing(level: LogLevel, format: LogFormat) -> bool {
    let filter = filter_for(level);
    let result = match format {
        LogFormat::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Structured => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init(),
    };
    result.is_ok()
}

//! Process-wide `tracing` setup.
//!
//! Two sinks share one filter:
//! - the console, human-readable with ANSI colors;
//! - a daily rolling file under the log directory, one JSON object per line.
//!
//! The filter comes from `RUST_LOG` when set, else from the configured level.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Why logging could not be set up.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("cannot create log directory: {0}")]
    Io(#[from] std::io::Error),
    /// The level string is not a valid filter directive.
    #[error("invalid log filter '{0}'")]
    Filter(String),
    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    Init(String),
}

/// Builds the filter: `RUST_LOG` first, then `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|_| LoggingError::Filter(level.to_string()))
}

/// Installs the global subscriber.
///
/// Log files are named `<app_name>.<date>` inside `log_dir`, which is
/// created when missing. The returned guard flushes the file writer when
/// dropped and must live as long as the process logs.
pub fn setup_logging(app_name: &str, log_dir: &Path, level: &str) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    tracing_subscriber::registry()
        .with(build_filter(level)?)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!("Logging initialized with level: {}", level);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_the_log_directory_and_refuses_a_second_init() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");

        let guard = setup_logging("gateway_test", &dir, "debug").unwrap();
        assert!(dir.is_dir());

        let again = setup_logging("gateway_test", &dir, "debug");
        assert!(matches!(again, Err(LoggingError::Init(_))));
        drop(guard);
    }

    #[test]
    fn bad_levels_are_rejected() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(build_filter("gateway=notalevel"), Err(LoggingError::Filter(_))));
        }
        assert!(build_filter("info").is_ok());
    }
}

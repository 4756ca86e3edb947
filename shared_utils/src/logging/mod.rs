//! Logging module for FunchoVPN.
//!
//! This module provides structured logging functionality using the `tracing`
//! crate. It includes utilities for initializing loggers with different
//! sink and format configurations.

use tracing::Level;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{self},
    prelude::*,
    EnvFilter,
};

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level (default: INFO)
    pub level: Level,

    /// Whether to log to stdout (default: true)
    pub log_to_stdout: bool,

    /// Whether to log to a file (default: false)
    pub log_to_file: bool,

    /// Directory to store log files (default: "/var/log/funchovpn")
    pub log_dir: String,

    /// Base filename for log files (default: "funchovpn")
    pub log_file_name: String,

    /// Whether to use JSON format for logs (default: false)
    pub json_format: bool,

    /// Whether to include file and line information (default: true)
    pub include_file_line: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            log_to_stdout: true,
            log_to_file: false,
            log_dir: "/var/log/funchovpn".to_string(),
            log_file_name: "funchovpn".to_string(),
            json_format: false,
            include_file_line: true,
        }
    }
}

/// Initialize logging with the given options.
///
/// Returns a guard that must be kept alive for the duration of the program
/// to ensure logs are flushed properly.
///
/// # Examples
///
/// ```
/// use shared_utils::logging::{init_logging, LogOptions};
/// use tracing::Level;
///
/// let options = LogOptions {
///     level: Level::DEBUG,
///     json_format: true,
///     ..Default::default()
/// };
///
/// let _guard = init_logging(options);
/// ```
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    // Bridge `log` crate records into `tracing` so legacy logs are captured
    let _ = LogTracer::init();

    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    let mut layers = Vec::new();
    let mut guard = None;

    if options.log_to_stdout {
        let stdout_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_target(true);

        let stdout_layer = if options.json_format {
            stdout_layer.json().boxed()
        } else {
            stdout_layer.boxed()
        };

        layers.push(stdout_layer);
    }

    if options.log_to_file {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);

        let (non_blocking, worker_guard) = NonBlocking::new(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_target(true)
            .with_writer(non_blocking);

        let file_layer = if options.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        };

        layers.push(file_layer);
    }

    // Set the global subscriber (ignore if already set in this process)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();

    guard
}

/// Initialize logging with default options.
///
/// # Examples
///
/// ```
/// use shared_utils::logging::init_default_logging;
///
/// let _guard = init_default_logging();
/// ```
pub fn init_default_logging() -> Option<WorkerGuard> {
    init_logging(LogOptions::default())
}

/// Initialize logging based on the configuration's `log_level` setting.
///
/// # Examples
///
/// ```
/// use shared_utils::logging::init_logging_from_config;
/// use shared_utils::config::Config;
///
/// let config = Config::default();
/// let _guard = init_logging_from_config(&config);
/// ```
pub fn init_logging_from_config(config: &crate::config::Config) -> Option<WorkerGuard> {
    let level = config.log_level.parse().unwrap_or(Level::INFO);

    let options = LogOptions {
        level,
        ..Default::default()
    };

    init_logging(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tracing::{debug, error, info, trace, warn};

    #[test]
    fn test_init_logging() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap().to_string();

        let options = LogOptions {
            level: Level::TRACE,
            log_to_stdout: false,
            log_to_file: true,
            log_dir,
            log_file_name: "test.log".to_string(),
            ..Default::default()
        };

        let _guard = init_logging(options);

        trace!("This is a trace message");
        debug!("This is a debug message");
        info!("This is an info message");
        warn!("This is a warning message");
        error!("This is an error message");

        // We can't easily verify the log contents in a test,
        // but we can at least check that the file was created
        let entries = fs::read_dir(dir.path()).unwrap();
        assert!(entries.count() > 0);
    }
}

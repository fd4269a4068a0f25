//! Logging configuration with rotation support
//!
//! # Example
//!
//! ```rust,no_run
//! use tdrepo_core::logging::init_logging;
//!
//! init_logging("logs", "tdrepo.log", "info").unwrap();
//! ```

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging to stdout and a daily-rotated file
///
/// - `directory`: Directory to store logs
/// - `filename_prefix`: Prefix for log files (e.g. "tdrepo.log")
/// - `level`: Default log level (e.g. "info", "debug")
pub fn init_logging(directory: &str, filename_prefix: &str, level: &str) -> Result<()> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename_prefix)
        .build(directory)
        .map_err(|e| Error::Internal(format!("Failed to create log appender: {}", e)))?;

    // Stdout: human readable
    let stdout_layer = fmt::layer().with_target(false).compact();

    // File: full text, no colours
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to init tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging from the `log_directory` and `log_level` of a config
pub fn init_logging_from(config: &RepositoryConfig) -> Result<()> {
    match &config.log_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let dir = dir
                .to_str()
                .ok_or_else(|| Error::config(format!("Log directory is not UTF-8: {:?}", dir)))?;
            init_logging(dir, "tdrepo.log", &config.log_level)
        }
        None => init_stdout_logging(&config.log_level),
    }
}

/// Initialize stdout-only logging, for embedding without a log directory
pub fn init_stdout_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to init tracing: {}", e)))?;

    Ok(())
}

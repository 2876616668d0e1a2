//! Logging configuration for the Ember chain engine.
//!
//! This module provides configurable logging with optional non-blocking
//! file output.

use std::fs;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

/// Name of the active log file.
const ACTIVE_LOG_NAME: &str = "ember-chain.log";

/// Guard that must be kept alive to ensure log flushing on shutdown.
/// When this guard is dropped, all buffered log entries will be flushed.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, falls back to INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to console (stderr).
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory where log files will be stored.
    pub log_dir: PathBuf,
}

/// Initialize console-only logging with the given level.
///
/// This is a convenience function for simple use cases. For file logging,
/// use [`init_logging`] with a [`LoggingConfig`].
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Initialize logging with the given configuration.
///
/// Returns a [`LoggingGuard`] that must be kept alive for the lifetime of
/// the process; dropping it flushes buffered file output.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    let level = config.level.unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let console_layer = config.console.then(|| {
        fmt::layer().with_target(true).with_writer(std::io::stderr)
    });

    let (file_layer, worker_guard) = match &config.file {
        Some(file_config) => {
            fs::create_dir_all(&file_config.log_dir)?;
            let appender =
                tracing_appender::rolling::never(&file_config.log_dir, ACTIVE_LOG_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
    })
}

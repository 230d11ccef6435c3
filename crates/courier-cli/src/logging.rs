//! Logging setup for the Courier CLI
//!
//! This module provides:
//! - Structured logging setup with `tracing-subscriber`
//! - Verbosity and environment driven filtering
//! - Multiple output formats (compact, full, JSON)
//! - Performance timing spans

use crate::error::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: String,
    /// Output format: compact, full, json
    pub format: LogFormat,
    /// Enable ANSI colors on the console
    pub ansi: bool,
    /// Include thread IDs
    pub thread_ids: bool,
    /// Include file and line numbers
    pub source_location: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact format for everyday use
    Compact,
    /// Full format with all details
    Full,
    /// JSON structured format
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            ansi: true,
            thread_ids: false,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from verbosity level
    pub fn from_verbosity(verbosity: u8) -> Self {
        let mut config = Self::default();

        match verbosity {
            0 => {
                config.level = "warn".to_string();
            }
            1 => {
                config.level = "info".to_string();
            }
            2 => {
                config.level = "debug".to_string();
                config.source_location = true;
            }
            _ => {
                config.level = "trace".to_string();
                config.format = LogFormat::Full;
                config.source_location = true;
                config.thread_ids = true;
            }
        }

        config
    }

    /// Apply an explicit format choice (flag or `COURIER_LOG_FORMAT`)
    pub fn with_format(mut self, format: Option<LogFormat>) -> Self {
        if let Some(format) = format {
            self.format = format;
        }
        self
    }
}

/// Initialize the global logging system
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let env_filter = create_env_filter(&config)?;
    let ansi = config.ansi && std::io::stderr().is_terminal();

    // each format is a distinct subscriber type
    let installed = match config.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(ansi)
                .with_thread_ids(config.thread_ids)
                .with_file(config.source_location)
                .with_line_number(config.source_location)
                .compact()
                .finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false)
                .with_thread_ids(config.thread_ids)
                .with_file(config.source_location)
                .with_line_number(config.source_location)
                .json()
                .finish(),
        ),
        LogFormat::Full => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(ansi)
                .with_thread_ids(config.thread_ids)
                .with_file(config.source_location)
                .with_line_number(config.source_location)
                .finish(),
        ),
    };
    installed.map_err(|e| Error::other(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(config = ?config, "Logging system initialized");
    Ok(())
}

fn create_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::other(format!("Invalid log level '{}': {}", config.level, e)))
}

/// Performance timing utilities
pub mod timing {
    use std::time::Instant;
    use tracing::{field, Span};

    /// A timer that logs its duration when dropped
    pub struct Timer {
        start: Instant,
        span: Span,
        operation: &'static str,
    }

    impl Timer {
        pub fn new(operation: &'static str) -> Self {
            let span = tracing::info_span!(
                "operation",
                operation = operation,
                duration_ms = field::Empty,
            );

            Self {
                start: Instant::now(),
                span,
                operation,
            }
        }

        pub fn span(&self) -> &Span {
            &self.span
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            let duration = self.start.elapsed();
            self.span.record("duration_ms", duration.as_millis() as u64);

            tracing::debug!(
                operation = %self.operation,
                duration_ms = duration.as_millis() as u64,
                "Operation completed"
            );
        }
    }
}

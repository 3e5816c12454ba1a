//! Structured logging for callbridge.
//!
//! Every callbridge crate logs through `tracing`; this module installs the
//! subscriber that turns those events into JSON (production) or pretty
//! (development) output.
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(server_id = 1, "Server started");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g. "info", "callbridge_server=debug,warn").
    pub level: String,

    /// Whether to output JSON.
    pub json_format: bool,

    /// Whether to emit span open/close events.
    pub span_events: bool,

    /// Whether to include file and line.
    pub file_line_info: bool,

    /// Whether to include thread IDs. Useful with worker threads.
    pub thread_ids: bool,

    /// Whether to include the target module path.
    pub include_target: bool,

    /// Service name for log fields.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output with debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            thread_ids: true,
            include_target: true,
            service_name: "callbridge".to_string(),
        }
    }

    /// JSON output with info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
            service_name: "callbridge".to_string(),
        }
    }
}

/// Installs the global log subscriber.
///
/// Does nothing when `config.enabled` is false.
///
/// # Errors
///
/// Returns [`TelemetryError::LoggingInit`] if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_ids(config.thread_ids)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_thread_ids(config.thread_ids)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::debug!(service = %config.service_name, "Logging initialized");
    Ok(())
}

/// Parses a filter directive.
///
/// # Errors
///
/// Returns [`TelemetryError::LoggingInit`] if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Field names used across callbridge log events.
pub mod fields {
    /// Host-side server id.
    pub const SERVER_ID: &str = "server_id";

    /// Completion tag.
    pub const TAG: &str = "tag";

    /// Engine call id.
    pub const CALL: &str = "call";

    /// Method path of an accepted call.
    pub const METHOD: &str = "method";

    /// Operation kind within a batch.
    pub const OP: &str = "op";

    /// Completion success flag.
    pub const SUCCESS: &str = "success";

    /// Error field name.
    pub const ERROR: &str = "error";
}

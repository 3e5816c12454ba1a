//! Prometheus metrics for callbridge.
//!
//! Recording goes through the `metrics` facade, so every `record_*`
//! function is a no-op until [`init_metrics`] installs a recorder.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `callbridge_calls_accepted_total` | Counter | - | Calls delivered to `request_call` handlers |
//! | `callbridge_batches_completed_total` | Counter | `outcome` | Batches completed by outcome |
//! | `callbridge_pending_batches` | Gauge | - | Batches registered and not yet completed |
//! | `callbridge_shutdowns_total` | Counter | `mode` | Shutdowns started by mode |
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge_telemetry::metrics::{record_batch_completed, BatchOutcome};
//!
//! record_batch_completed(BatchOutcome::Success);
//! ```

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Calls delivered to handlers.
pub const CALLS_ACCEPTED_TOTAL: &str = "callbridge_calls_accepted_total";
/// Completed batches, labelled by outcome.
pub const BATCHES_COMPLETED_TOTAL: &str = "callbridge_batches_completed_total";
/// Outstanding batches.
pub const PENDING_BATCHES: &str = "callbridge_pending_batches";
/// Shutdowns, labelled by mode.
pub const SHUTDOWNS_TOTAL: &str = "callbridge_shutdowns_total";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address for the scrape endpoint (e.g. "0.0.0.0:9090"). When unset the
    /// recorder is installed without a listener and metrics are only
    /// available through [`render_metrics`].
    pub addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: None,
        }
    }
}

/// How a batch completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Native success, result parsed.
    Success,
    /// Native failure or cancellation.
    Cancelled,
    /// A result failed to parse.
    ParseError,
    /// The queue was closed before the completion arrived.
    Abandoned,
}

impl BatchOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Cancelled => "cancelled",
            Self::ParseError => "parse_error",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Which shutdown path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// `try_shutdown`.
    Graceful,
    /// `force_shutdown`.
    Forced,
}

impl ShutdownMode {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Forced => "forced",
        }
    }
}

/// Installs the Prometheus recorder.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidAddress`] if `addr` does not parse and
/// [`TelemetryError::MetricsInit`] if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            // Serves the scrape endpoint itself; no handle is kept.
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        None => {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized, or were initialized with
/// a listen address.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        CALLS_ACCEPTED_TOTAL,
        "Total number of inbound calls delivered to request_call handlers"
    );
    describe_counter!(
        BATCHES_COMPLETED_TOTAL,
        "Total number of operation batches completed, by outcome"
    );
    describe_gauge!(
        PENDING_BATCHES,
        "Number of operation batches waiting for a native completion"
    );
    describe_counter!(SHUTDOWNS_TOTAL, "Total number of server shutdowns, by mode");
}

/// Records a call delivered to a handler.
pub fn record_call_accepted() {
    counter!(CALLS_ACCEPTED_TOTAL).increment(1);
}

/// Records a completed batch.
pub fn record_batch_completed(outcome: BatchOutcome) {
    counter!(BATCHES_COMPLETED_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Sets the number of outstanding batches.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_batches(pending: usize) {
    gauge!(PENDING_BATCHES).set(pending as f64);
}

/// Records the start of a shutdown.
pub fn record_shutdown(mode: ShutdownMode) {
    counter!(SHUTDOWNS_TOTAL, "mode" => mode.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(config.addr.is_none());
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: Some("not-an-address".to_string()),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_labels() {
        assert_eq!(BatchOutcome::ParseError.as_str(), "parse_error");
        assert_eq!(BatchOutcome::Abandoned.as_str(), "abandoned");
        assert_eq!(ShutdownMode::Forced.as_str(), "forced");
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder installed: the facade drops everything.
        record_call_accepted();
        record_batch_completed(BatchOutcome::Success);
        record_batch_completed(BatchOutcome::Cancelled);
        set_pending_batches(3);
        record_shutdown(ShutdownMode::Graceful);
    }
}

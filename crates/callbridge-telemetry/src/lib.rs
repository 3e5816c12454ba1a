//! Logging and metrics for callbridge.
//!
//! - **Logging**: `tracing` events rendered as JSON or pretty text
//! - **Metrics**: Prometheus-format metrics via the `metrics` facade
//!
//! The server crates only emit events and record metrics; installing a
//! subscriber or recorder is left to the embedding application through
//! [`init_telemetry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("echo-server")
//!     .metrics_addr("0.0.0.0:9464")
//!     .build();
//!
//! init_telemetry(&config)?;
//! ```

#![doc(html_root_url = "https://docs.rs/callbridge-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, BatchOutcome, MetricsConfig, ShutdownMode};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns the first subsystem error.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_everything_disabled() {
        let config = TelemetryConfig {
            logging: LogConfig {
                enabled: false,
                ..LogConfig::default()
            },
            metrics: MetricsConfig::default(),
        };
        assert!(init_telemetry(&config).is_ok());
    }
}

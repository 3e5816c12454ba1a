//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the metrics recorder.
    #[error("Failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to install the log subscriber.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse the metrics listen address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already installed".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to initialize metrics: recorder already installed"
        );

        let err = TelemetryError::InvalidAddress("nope".to_string());
        assert_eq!(err.to_string(), "Invalid address: nope");
    }
}

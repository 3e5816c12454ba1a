//! Telemetry configuration.

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    logging: Option<LogConfig>,
    metrics: Option<MetricsConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name reported in log fields.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Enables metrics, serving them on `addr`.
    #[must_use]
    pub fn metrics_addr(mut self, addr: &str) -> Self {
        self.metrics = Some(MetricsConfig {
            enabled: true,
            addr: Some(addr.to_string()),
        });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let mut logging = self.logging.unwrap_or_default();
        if let Some(name) = self.service_name {
            logging.service_name = name;
        }
        TelemetryConfig {
            logging,
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TelemetryConfig::builder().build();
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.logging.service_name, "callbridge");
    }

    #[test]
    fn test_builder_overrides() {
        let config = TelemetryConfig::builder()
            .logging(LogConfig::development())
            .service_name("echo-server")
            .metrics_addr("127.0.0.1:9464")
            .build();

        assert_eq!(config.logging.service_name, "echo-server");
        assert!(!config.logging.json_format);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.addr.as_deref(), Some("127.0.0.1:9464"));
    }
}

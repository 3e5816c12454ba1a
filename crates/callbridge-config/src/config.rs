//! Root configuration type.

use callbridge_telemetry::logging::{create_env_filter, LogConfig};
use callbridge_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::schema::MAX_WORKER_THREADS;
use crate::{ConfigError, RuntimeConfig, ServerConfig};

/// Complete callbridge configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables over the defaults.
///
/// # Example
///
/// ```
/// use callbridge_config::CallbridgeConfig;
///
/// let config = CallbridgeConfig::default();
/// assert_eq!(config.runtime.worker_threads, 1);
/// assert!(config.server.ports.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct CallbridgeConfig {
    /// Completion-queue runtime settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Server construction settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CallbridgeConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::{CallbridgeConfig, RuntimeConfig};
    ///
    /// let config = CallbridgeConfig::builder()
    ///     .runtime(RuntimeConfig { worker_threads: 4, ..Default::default() })
    ///     .port("127.0.0.1:0")
    ///     .build();
    ///
    /// assert_eq!(config.runtime.worker_threads, 4);
    /// assert_eq!(config.server.ports, vec!["127.0.0.1:0".to_string()]);
    /// ```
    #[must_use]
    pub fn builder() -> CallbridgeConfigBuilder {
        CallbridgeConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `runtime.worker_threads` exceeds the worker limit
    /// - `runtime.poll_interval_ms` is zero
    /// - a listen address is empty
    /// - the log level is not a valid filter directive
    /// - the metrics address is not a socket address
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::invalid_value(
                "runtime.worker_threads",
                format!("must be at most {MAX_WORKER_THREADS}"),
            ));
        }

        if self.runtime.poll_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "runtime.poll_interval_ms",
                "must be greater than zero",
            ));
        }

        if let Some(index) = self.server.ports.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::invalid_value(
                format!("server.ports[{index}]"),
                "listen address must not be empty",
            ));
        }

        let logging = &self.telemetry.logging;
        if logging.enabled {
            create_env_filter(&logging.level).map_err(|e| {
                ConfigError::invalid_value("telemetry.logging.level", e.to_string())
            })?;
        }

        let metrics = &self.telemetry.metrics;
        if let (true, Some(addr)) = (metrics.enabled, metrics.addr.as_deref()) {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "telemetry.metrics.addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, queue drained on the host.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::CallbridgeConfig;
    ///
    /// let config = CallbridgeConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// assert!(config.runtime.is_manual());
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging = LogConfig::development();
        config.runtime.worker_threads = 0;
        config
    }

    /// Production preset: JSON logs, metrics enabled, two queue workers.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::CallbridgeConfig;
    ///
    /// let config = CallbridgeConfig::production();
    /// assert!(config.telemetry.logging.json_format);
    /// assert!(config.telemetry.metrics.enabled);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging = LogConfig::production();
        config.telemetry.metrics.enabled = true;
        config.runtime.worker_threads = 2;
        config
    }
}

/// Builder for [`CallbridgeConfig`].
#[derive(Debug, Default)]
pub struct CallbridgeConfigBuilder {
    config: CallbridgeConfig,
}

impl CallbridgeConfigBuilder {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime section.
    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.config.runtime = runtime;
        self
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Append a listen address.
    #[must_use]
    pub fn port(mut self, address: impl Into<String>) -> Self {
        self.config.server.ports.push(address.into());
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CallbridgeConfig {
        self.config
    }
}

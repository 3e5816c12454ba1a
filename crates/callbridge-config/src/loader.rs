//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, `.env` files and environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{CallbridgeConfig, ConfigError};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (or a preset)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables, optionally seeded from a `.env` file
///
/// # Example
///
/// ```no_run
/// use callbridge_config::ConfigLoader;
///
/// # fn main() -> Result<(), callbridge_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("callbridge.toml")?
///     .with_dotenv()?
///     .with_env_prefix("CALLBRIDGE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: CallbridgeConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CallbridgeConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = CallbridgeConfig::default();
        self
    }

    /// Start from the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = CallbridgeConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = CallbridgeConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen from the extension: `.toml` or `.json`. The file
    /// replaces the current configuration; sections and fields it omits take
    /// their default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON or unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or `format` is neither `"toml"`
    /// nor `"json"`.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [runtime]
    ///     worker_threads = 4
    ///
    ///     [server]
    ///     ports = ["0.0.0.0:50051"]
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.runtime.worker_threads, 4);
    /// assert_eq!(config.server.ports, vec!["0.0.0.0:50051".to_string()]);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`. With prefix
    /// `CALLBRIDGE`:
    /// - `CALLBRIDGE__RUNTIME__WORKER_THREADS=4`
    /// - `CALLBRIDGE__SERVER__PORTS=0.0.0.0:50051,0.0.0.0:50052`
    /// - `CALLBRIDGE__TELEMETRY__LOGGING__LEVEL=debug`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load `.env` from the current directory or its parents, if present.
    ///
    /// Variables already set in the process environment are left alone.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DotenvError` if a `.env` file exists but cannot
    /// be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a specific `.env` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DotenvError` if the file is missing or invalid.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref())?;
        Ok(self)
    }

    /// Apply environment overrides, validate, and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed or
    /// the final configuration is invalid.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().load().unwrap();
    /// assert_eq!(config.runtime.poll_interval_ms, 200);
    /// ```
    pub fn load(mut self) -> Result<CallbridgeConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Return the configuration without applying environment overrides or
    /// validating.
    #[must_use]
    pub fn load_unvalidated(self) -> CallbridgeConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<CallbridgeConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        // Sorted so that failures are reported deterministically.
        let env_vars: BTreeMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, &marker)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, marker: &str) -> Result<(), ConfigError> {
        let Some(path) = key.strip_prefix(marker) else {
            return Err(ConfigError::env_parse_error(key, "invalid key format"));
        };

        let parts: Vec<&str> = path.split("__").collect();

        match parts.as_slice() {
            // Runtime section
            ["RUNTIME", "WORKER_THREADS"] => {
                self.config.runtime.worker_threads = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["RUNTIME", "POLL_INTERVAL_MS"] => {
                self.config.runtime.poll_interval_ms = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }

            // Server section
            ["SERVER", "PORTS"] => {
                self.config.server.ports = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }

            // Telemetry logging
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                self.config.telemetry.logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                self.config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                self.config.telemetry.logging.json_format = match value.to_lowercase().as_str() {
                    "json" => true,
                    "pretty" => false,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "SERVICE_NAME"] => {
                self.config.telemetry.logging.service_name = value.to_string();
            }

            // Telemetry metrics
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                self.config.telemetry.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                self.config.telemetry.metrics.addr = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, TempDir};

    // Each test uses its own prefix so parallel tests never share variables.
    fn set_env(vars: &[(&str, &str)]) {
        for (key, value) in vars {
            env::set_var(key, value);
        }
    }

    fn clear_env(vars: &[(&str, &str)]) {
        for (key, _) in vars {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, CallbridgeConfig::default());
    }

    #[test]
    fn test_loader_presets() {
        let dev = ConfigLoader::new().with_development().load().unwrap();
        assert!(dev.runtime.is_manual());

        let prod = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(prod.runtime.worker_threads, 2);

        let reset = ConfigLoader::new().with_production().with_defaults().load().unwrap();
        assert_eq!(reset, CallbridgeConfig::default());
    }

    #[test]
    fn test_with_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[runtime]
worker_threads = 3
poll_interval_ms = 50

[server]
ports = ["127.0.0.1:0"]

[server.options]
"grpc.max_concurrent_streams" = 10
"#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.runtime.worker_threads, 3);
        assert_eq!(config.runtime.poll_interval_ms, 50);
        assert_eq!(config.server.ports, vec!["127.0.0.1:0".to_string()]);
        assert_eq!(config.server.options.get_int("grpc.max_concurrent_streams"), Some(10));
    }

    #[test]
    fn test_with_json_file() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"runtime": {{"worker_threads": 0}}}}"#).unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert!(config.runtime.is_manual());
        assert_eq!(config.runtime.poll_interval_ms, 200);
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/callbridge.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_optional_file_missing() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/callbridge.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, CallbridgeConfig::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        let result = ConfigLoader::new().with_file(file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ConfigLoader::new().with_string("[runtime]\nthreads = 2", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_option_outside_int_range_rejected() {
        let result = ConfigLoader::new().with_string(
            "[server.options]\n\"grpc.max_concurrent_streams\" = 3000000000",
            "toml",
        );
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_unsupported_string_format() {
        let result = ConfigLoader::new().with_string("runtime: {}", "yaml");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars = [
            ("CBTEST_ENV__RUNTIME__WORKER_THREADS", "8"),
            ("CBTEST_ENV__RUNTIME__POLL_INTERVAL_MS", "25"),
            ("CBTEST_ENV__SERVER__PORTS", "127.0.0.1:1, ,127.0.0.1:2"),
            ("CBTEST_ENV__TELEMETRY__LOGGING__FORMAT", "pretty"),
            ("CBTEST_ENV__TELEMETRY__METRICS__ENABLED", "yes"),
            ("CBTEST_ENV__TELEMETRY__METRICS__ADDR", "127.0.0.1:9095"),
            ("CBTEST_ENV__UNKNOWN__KEY", "ignored"),
        ];
        set_env(&vars);

        let config = ConfigLoader::new().with_env_prefix("cbtest_env").load();
        clear_env(&vars);

        let config = config.unwrap();
        assert_eq!(config.runtime.worker_threads, 8);
        assert_eq!(config.runtime.poll_interval_ms, 25);
        assert_eq!(
            config.server.ports,
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()]
        );
        assert!(!config.telemetry.logging.json_format);
        assert!(config.telemetry.metrics.enabled);
        assert_eq!(config.telemetry.metrics.addr.as_deref(), Some("127.0.0.1:9095"));
    }

    #[test]
    fn test_env_override_beats_file() {
        let vars = [("CBTEST_LAYER__RUNTIME__WORKER_THREADS", "5")];
        set_env(&vars);

        let config = ConfigLoader::new()
            .with_string("[runtime]\nworker_threads = 2", "toml")
            .unwrap()
            .with_env_prefix("CBTEST_LAYER")
            .load();
        clear_env(&vars);

        assert_eq!(config.unwrap().runtime.worker_threads, 5);
    }

    #[test]
    fn test_env_parse_error() {
        let vars = [("CBTEST_BAD__RUNTIME__WORKER_THREADS", "many")];
        set_env(&vars);

        let result = ConfigLoader::new().with_env_prefix("CBTEST_BAD").load();
        clear_env(&vars);

        assert!(matches!(
            result,
            Err(ConfigError::EnvParseError { var, .. }) if var == "CBTEST_BAD__RUNTIME__WORKER_THREADS"
        ));
    }

    #[test]
    fn test_env_override_is_validated() {
        let vars = [("CBTEST_INVALID__RUNTIME__POLL_INTERVAL_MS", "0")];
        set_env(&vars);

        let result = ConfigLoader::new().with_env_prefix("CBTEST_INVALID").load();
        clear_env(&vars);

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_dotenv_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "CBTEST_DOTENV__RUNTIME__WORKER_THREADS=3\n").unwrap();

        let config = ConfigLoader::new()
            .with_dotenv_file(&path)
            .unwrap()
            .with_env_prefix("CBTEST_DOTENV")
            .load();
        env::remove_var("CBTEST_DOTENV__RUNTIME__WORKER_THREADS");

        assert_eq!(config.unwrap().runtime.worker_threads, 3);
    }

    #[test]
    fn test_dotenv_file_missing() {
        let result = ConfigLoader::new().with_dotenv_file("/nonexistent/.env");
        assert!(matches!(result, Err(ConfigError::DotenvError(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

//! Configuration schema sections.

use std::time::Duration;

use callbridge_core::ChannelArgs;
use serde::{Deserialize, Serialize};

/// Upper bound on completion-queue worker threads.
pub const MAX_WORKER_THREADS: usize = 64;

/// Completion-queue runtime settings.
///
/// # Example
///
/// ```
/// use callbridge_config::RuntimeConfig;
/// use std::time::Duration;
///
/// let runtime = RuntimeConfig::default();
/// assert_eq!(runtime.worker_threads, 1);
/// assert_eq!(runtime.poll_interval(), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of threads blocking on the native queue.
    ///
    /// `0` disables workers: the host thread drains the queue itself.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// How long a worker blocks in one poll before checking for shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns `true` when no worker threads are configured.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.worker_threads == 0
    }
}

/// Server construction settings.
///
/// # Example
///
/// ```
/// use callbridge_config::ServerConfig;
///
/// let server: ServerConfig = toml::from_str(r#"
///     ports = ["127.0.0.1:50051"]
///
///     [options]
///     "grpc.max_concurrent_streams" = 100
/// "#).unwrap();
///
/// assert_eq!(server.ports.len(), 1);
/// assert_eq!(server.options.get_int("grpc.max_concurrent_streams"), Some(100));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen addresses bound with insecure credentials at startup.
    #[serde(default)]
    pub ports: Vec<String>,

    /// Channel options handed to the engine when the server is created.
    #[serde(default)]
    pub options: ChannelArgs,
}

fn default_worker_threads() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_defaults() {
        let runtime = RuntimeConfig::default();
        assert_eq!(runtime.worker_threads, 1);
        assert_eq!(runtime.poll_interval_ms, 200);
        assert!(!runtime.is_manual());
    }

    #[test]
    fn test_runtime_partial_toml() {
        let runtime: RuntimeConfig = toml::from_str("worker_threads = 0").unwrap();
        assert!(runtime.is_manual());
        assert_eq!(runtime.poll_interval_ms, 200);
    }

    #[test]
    fn test_runtime_rejects_unknown_field() {
        let result: Result<RuntimeConfig, _> = toml::from_str("threads = 4");
        assert!(result.is_err());
    }

    #[test]
    fn test_server_options_mixed_values() {
        let server: ServerConfig = serde_json::from_str(
            r#"{"options": {"grpc.primary_user_agent": "bridge/1.0", "grpc.keepalive_time_ms": 30000}}"#,
        )
        .unwrap();
        assert!(server.ports.is_empty());
        assert_eq!(server.options.get_str("grpc.primary_user_agent"), Some("bridge/1.0"));
        assert_eq!(server.options.get_int("grpc.keepalive_time_ms"), Some(30000));
    }
}

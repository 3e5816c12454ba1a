//! # Callbridge Config
//!
//! Layered configuration for callbridge servers.
//!
//! Configuration is assembled from:
//! 1. Built-in defaults or a preset (`development`, `production`)
//! 2. A TOML or JSON file
//! 3. Environment variables (`PREFIX__SECTION__KEY`), optionally seeded from
//!    a `.env` file
//!
//! and validated once all layers are applied.
//!
//! ## Example
//!
//! ```
//! use callbridge_config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_string("[runtime]\nworker_threads = 0", "toml")
//!     .unwrap()
//!     .load()
//!     .unwrap();
//!
//! assert!(config.runtime.is_manual());
//! ```
//!
//! ## Sections
//!
//! - `runtime`: completion-queue worker threads and poll interval
//! - `server`: listen addresses and channel options
//! - `telemetry`: logging and metrics, see `callbridge-telemetry`

mod config;
mod error;
mod loader;
mod schema;

pub use config::{CallbridgeConfig, CallbridgeConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{RuntimeConfig, ServerConfig, MAX_WORKER_THREADS};

//! # Callbridge
//!
//! **Call acceptance and server lifecycle on top of a completion-queue RPC engine**
//!
//! A native RPC engine reports finished work by posting opaque tags to a
//! blocking queue. Callbridge runs that queue, turns each tag back into a
//! typed result and invokes your callbacks for it on one host thread:
//!
//! - **Completion queue** – tag to batch dispatch, worker threads or manual draining
//! - **Operation batches** – one callback per tag, exactly once, even on shutdown
//! - **Server lifecycle** – ports, start, call requests, graceful and forced shutdown
//! - **Observability** – `tracing` events and `metrics` counters at every transition
//! - **Layered configuration** – defaults, TOML/JSON files, `.env`, environment
//!
//! ## Quick Start
//!
//! ```
//! use callbridge::prelude::*;
//! use callbridge::engine::loopback::{InboundCall, LoopbackEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_string("[runtime]\nworker_threads = 0\n[server]\nports = [\"127.0.0.1:0\"]", "toml")?
//!     .load()?;
//!
//! let engine = LoopbackEngine::new();
//! let endpoint = Endpoint::from_config(&config, &engine)?;
//! endpoint.start();
//!
//! endpoint.server().request_call(|call: ServerResult<IncomingCall>| {
//!     if let Ok(incoming) = call {
//!         tracing::info!(method = %incoming.method, "Accepted");
//!         let _ = incoming.call.finish();
//!     }
//! });
//!
//! engine.dial(endpoint.ports()[0])?.start_call(InboundCall::new("/echo.Echo/Say"))?;
//! endpoint.queue().run_until_idle();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! engine ──tag──▶ native queue ──▶ worker threads ──(tag, ok)──▶ host thread
//!                                                                   │
//!                          user callback ◀── batch.complete ◀── dispatch
//! ```

#![doc(html_root_url = "https://docs.rs/callbridge/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod endpoint;

pub use endpoint::Endpoint;

// Re-export core types
pub use callbridge_core as core;

// Re-export the engine boundary and the loopback engine
pub use callbridge_engine as engine;

// Re-export queue, batch and server types
pub use callbridge_server as server;

// Re-export configuration
pub use callbridge_config as config;

// Re-export logging and metrics setup
pub use callbridge_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use callbridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::Endpoint;

    pub use callbridge_core::{ChannelArgs, Deadline, Metadata};

    pub use callbridge_engine::{Engine, ServerCredentials};

    pub use callbridge_server::{
        Call, CompletionQueue, HostContext, IncomingCall, QueueOptions, Server, ServerError,
        ServerResult, ServerState,
    };

    pub use callbridge_config::{CallbridgeConfig, ConfigLoader};

    pub use callbridge_telemetry::{init_telemetry, TelemetryConfig};
}

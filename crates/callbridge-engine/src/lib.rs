//! # Callbridge Engine
//!
//! The boundary between callbridge and a native RPC engine.
//!
//! A native engine owns listening ports, matches inbound calls to accept
//! requests, and reports every finished asynchronous operation by posting its
//! [`Tag`] to a [`NativeQueue`]. Worker threads block on
//! [`NativeQueue::next`]; everything above this crate only ever sees
//! `(tag, success)` pairs.
//!
//! - [`Engine`] / [`NativeServer`] / [`NativeCall`] - the consumed boundary
//! - [`NativeQueue`] - blocking completion queue
//! - [`loopback`] - an in-process engine used by tests and demos
//!
//! ## Example
//!
//! ```
//! use callbridge_core::ChannelArgs;
//! use callbridge_engine::{CallSlot, Engine, NativeQueue, QueueEvent, Tag};
//! use callbridge_engine::loopback::{InboundCall, LoopbackEngine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = LoopbackEngine::new();
//! let queue = Arc::new(NativeQueue::new());
//! let server = engine.create_server(&ChannelArgs::new());
//! server.register_completion_queue(Arc::clone(&queue));
//! let port = server.add_insecure_port("127.0.0.1:0");
//! server.start();
//!
//! let slot = CallSlot::new();
//! server.request_call(slot.clone(), Tag::new(1)).unwrap();
//! engine.dial(port).unwrap().start_call(InboundCall::new("/echo.Echo/Say")).unwrap();
//!
//! assert_eq!(
//!     queue.next(Some(Duration::from_secs(1))),
//!     QueueEvent::Op { tag: Tag::new(1), success: true }
//! );
//! assert!(slot.is_filled());
//! ```

#![doc(html_root_url = "https://docs.rs/callbridge-engine/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod call;
mod credentials;
mod error;
pub mod loopback;
mod queue;

use std::fmt;
use std::sync::Arc;

use callbridge_core::ChannelArgs;

pub use call::{CallId, CallSlot, NativeCall, RawCall};
pub use credentials::{KeyCertPair, ServerCredentials};
pub use error::CallErrorCode;
pub use queue::{NativeQueue, QueueEvent, Tag};

/// Factory for native servers.
pub trait Engine: Send + Sync {
    /// Creates a native server configured with `args`.
    ///
    /// Arguments are validated before this is called; the engine may ignore
    /// keys it does not understand.
    fn create_server(&self, args: &ChannelArgs) -> Box<dyn NativeServer>;
}

/// A native server handle.
///
/// Dropping the handle destroys the native server. Every operation that
/// reports completion does so by posting its tag to the registered queue,
/// exactly once.
pub trait NativeServer: Send + Sync + fmt::Debug {
    /// Registers the queue that receives every completion for this server.
    fn register_completion_queue(&self, queue: Arc<NativeQueue>);

    /// Binds an insecure listening port. Returns the bound port, or `0` on failure.
    fn add_insecure_port(&self, address: &str) -> u16;

    /// Binds a secure listening port. Returns the bound port, or `0` on failure.
    fn add_secure_port(&self, address: &str, credentials: &ServerCredentials) -> u16;

    /// Starts accepting calls.
    fn start(&self);

    /// Requests one inbound call.
    ///
    /// When a call is matched the engine fills `slot` and posts `tag` with
    /// `success = true`. If the server shuts down first the tag is posted
    /// with `success = false` and the slot stays empty.
    fn request_call(&self, slot: CallSlot, tag: Tag) -> Result<(), CallErrorCode>;

    /// Stops accepting calls and posts `tag` once every in-flight call ended.
    fn shutdown_and_notify(&self, tag: Tag);

    /// Cancels every call currently in flight.
    fn cancel_all_calls(&self);
}

//! # Callbridge Server
//!
//! Call acceptance and lifecycle management on top of a native RPC engine.
//!
//! The engine reports every finished asynchronous operation by posting an
//! opaque tag to a blocking queue. This crate turns those tags back into
//! typed results and runs user callbacks for them, one at a time, on a
//! single host thread:
//!
//! - [`CompletionQueue`] - tag → batch dispatch, worker threads, manual draining
//! - [`OperationBatch`] / [`Operation`] - the unit of work behind one tag
//! - [`Server`] - ports, start, call requests, graceful and forced shutdown
//! - [`Call`] / [`IncomingCall`] - what a `request_call` handler receives
//! - [`HostContext`] - deferred callbacks and the keep-alive root set
//!
//! ## Example
//!
//! ```
//! use callbridge_core::ChannelArgs;
//! use callbridge_engine::loopback::{InboundCall, LoopbackEngine};
//! use callbridge_server::{CompletionQueue, HostContext, QueueOptions, Server};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let host = HostContext::new();
//! let queue = CompletionQueue::new(&host, QueueOptions::manual()).unwrap();
//! let engine = LoopbackEngine::new();
//!
//! let server = Server::create(&queue, &engine, &ChannelArgs::new());
//! let port = server.add_port("[::]:0", None).unwrap();
//! server.start();
//!
//! server.request_call(|call| {
//!     let call = call.unwrap();
//!     call.call.finish().unwrap();
//! });
//! engine.dial(port).unwrap().start_call(InboundCall::new("/echo.Echo/Say")).unwrap();
//! queue.run_until_idle();
//!
//! let done = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&done);
//! server.try_shutdown(move |result| flag.set(result.is_ok()));
//! queue.run_until_idle();
//! assert!(done.get());
//! assert!(server.is_shutdown());
//! ```

#![doc(html_root_url = "https://docs.rs/callbridge-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod batch;
mod call;
mod error;
mod host;
mod op;
mod queue;
mod server;
mod worker;

pub use batch::{BatchCallback, OperationBatch};
pub use call::{Call, IncomingCall};
pub use error::{ServerError, ServerResult};
pub use host::{HostContext, RootToken};
pub use op::{CloseNotifyOp, NewCallOp, OpValue, Operation, ShutdownNotifyOp};
pub use queue::{CompletionQueue, QueueOptions, DEFAULT_POLL_INTERVAL};
pub use server::{Server, ServerState, WeakServer};

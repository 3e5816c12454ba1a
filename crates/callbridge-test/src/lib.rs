//! # Callbridge Test
//!
//! Test utilities for callbridge: in-process servers on the loopback engine,
//! without binding real ports.
//!
//! ## Key Features
//!
//! - **Harness**: host context, completion queue and engine in one fixture
//! - **Deterministic draining**: completions dispatch only when the test
//!   calls [`TestHarness::settle`]
//! - **Typed calls**: [`TestCall`] builds a call and checks what the server
//!   delivered
//! - **Callback capture**: [`Recorder`] collects callback results
//!
//! ## Example
//!
//! ```
//! use callbridge_server::ServerResult;
//! use callbridge_test::{Recorder, TestCall, TestHarness};
//!
//! let harness = TestHarness::new();
//! let (server, client) = harness.started_server().unwrap();
//!
//! let closed: Recorder<ServerResult<()>> = Recorder::new();
//! let incoming = harness.accept(&server, &client, TestCall::new("/svc/M")).unwrap();
//! incoming.call.on_close(closed.callback());
//!
//! server.force_shutdown();
//! harness.settle();
//!
//! assert!(closed.take_one().unwrap_err().is_cancelled());
//! ```

#![doc(html_root_url = "https://docs.rs/callbridge-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod call;
mod error;
mod harness;
mod recorder;

pub use call::TestCall;
pub use error::{TestError, TestResult};
pub use harness::{TestHarness, TEST_ADDRESS};
pub use recorder::Recorder;

//! In-process loopback engine.
//!
//! `LoopbackEngine` implements the native boundary entirely in memory: ports
//! live in a registry owned by the engine, and "clients" dial a bound port to
//! inject inbound calls. It is the engine used by callbridge's own tests and
//! by [`callbridge-test`](https://docs.rs/callbridge-test).
//!
//! Behaviour mirrors a real engine where it matters for call acceptance:
//!
//! - Inbound calls are matched FIFO against pending accept requests; calls
//!   arriving with no request outstanding wait in a backlog.
//! - Graceful shutdown fails pending accept requests, cancels the backlog,
//!   and posts the notification tag once every in-flight call has ended.
//! - `cancel_all_calls` cancels every in-flight call immediately.
//! - Dropping the server handle destroys it and releases its ports.

mod call;
mod server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use callbridge_core::{ChannelArgs, Metadata, RawMetadataEntry, RawTimespec};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{Engine, NativeServer};

pub use call::{CallStatus, ClientCall};
use server::{LoopbackServer, ServerShared};

/// First port handed out for `:0` bindings.
const EPHEMERAL_PORT_START: u16 = 49152;

/// Errors returned when dialing the loopback engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    /// Nothing is bound to the port.
    #[error("connection refused on port {port}")]
    Refused {
        /// The dialed port.
        port: u16,
    },

    /// The server is not started, is shutting down, or was destroyed.
    #[error("server unavailable")]
    Unavailable,
}

/// An inbound call as sent by a client.
///
/// Fields are raw bytes so tests can also inject payloads the server must
/// reject.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub(crate) method: Bytes,
    pub(crate) host: Bytes,
    pub(crate) deadline: RawTimespec,
    pub(crate) metadata: Vec<RawMetadataEntry>,
}

impl InboundCall {
    /// Creates a call for `method` with no deadline and no metadata.
    pub fn new(method: impl AsRef<str>) -> Self {
        Self {
            method: Bytes::copy_from_slice(method.as_ref().as_bytes()),
            host: Bytes::from_static(b"localhost"),
            deadline: RawTimespec::infinite_future(),
            metadata: Vec::new(),
        }
    }

    /// Sets the authority.
    #[must_use]
    pub fn host(mut self, host: impl AsRef<str>) -> Self {
        self.host = Bytes::copy_from_slice(host.as_ref().as_bytes());
        self
    }

    /// Sets the raw authority bytes.
    #[must_use]
    pub fn raw_host(mut self, host: impl Into<Bytes>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: RawTimespec) -> Self {
        self.deadline = deadline;
        self
    }

    /// Appends a metadata entry.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<Bytes>) -> Self {
        self.metadata.push((
            Bytes::copy_from_slice(name.as_ref().as_bytes()),
            value.into(),
        ));
        self
    }

    /// Appends every entry of decoded metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: &Metadata) -> Self {
        self.metadata.extend(metadata.to_raw());
        self
    }

    /// Appends a raw metadata entry without validation.
    #[must_use]
    pub fn raw_header(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.metadata.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug)]
struct Binding {
    server: Weak<ServerShared>,
    secure: bool,
}

#[derive(Debug)]
struct PortRegistry {
    bound: HashMap<u16, Binding>,
    next_ephemeral: u16,
}

impl PortRegistry {
    fn new() -> Self {
        Self {
            bound: HashMap::new(),
            next_ephemeral: EPHEMERAL_PORT_START,
        }
    }

    fn bind(&mut self, requested: u16, binding: Binding) -> u16 {
        let port = if requested == 0 {
            match self.allocate_ephemeral() {
                Some(port) => port,
                None => return 0,
            }
        } else if self.bound.contains_key(&requested) {
            return 0;
        } else {
            requested
        };
        self.bound.insert(port, binding);
        port
    }

    fn allocate_ephemeral(&mut self) -> Option<u16> {
        let span = usize::from(u16::MAX - EPHEMERAL_PORT_START) + 1;
        for _ in 0..span {
            let candidate = self.next_ephemeral;
            self.next_ephemeral = if candidate == u16::MAX {
                EPHEMERAL_PORT_START
            } else {
                candidate + 1
            };
            if !self.bound.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn release(&mut self, ports: &[u16]) {
        for port in ports {
            self.bound.remove(port);
        }
    }
}

#[derive(Debug)]
pub(crate) struct EngineShared {
    ports: Mutex<PortRegistry>,
    next_server_id: AtomicU64,
    next_call_id: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl EngineShared {
    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn bind(&self, requested: u16, server: &Arc<ServerShared>, secure: bool) -> u16 {
        self.ports.lock().bind(
            requested,
            Binding {
                server: Arc::downgrade(server),
                secure,
            },
        )
    }

    pub(crate) fn release_ports(&self, ports: &[u16]) {
        self.ports.lock().release(ports);
    }

    pub(crate) fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-process engine.
///
/// Clones share the same port registry and counters.
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    shared: Arc<EngineShared>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    /// Creates an engine with an empty port registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared {
                ports: Mutex::new(PortRegistry::new()),
                next_server_id: AtomicU64::new(0),
                next_call_id: AtomicU64::new(0),
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }),
        }
    }

    /// Connects to a bound port.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Refused`] if nothing listens on `port`.
    pub fn dial(&self, port: u16) -> Result<LoopbackClient, DialError> {
        let ports = self.shared.ports.lock();
        let binding = ports.bound.get(&port).ok_or(DialError::Refused { port })?;
        let server = binding
            .server
            .upgrade()
            .ok_or(DialError::Refused { port })?;
        Ok(LoopbackClient {
            server,
            port,
            secure: binding.secure,
        })
    }

    /// Number of native servers created so far.
    #[must_use]
    pub fn servers_created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Number of native servers destroyed so far.
    #[must_use]
    pub fn servers_destroyed(&self) -> usize {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Ports currently bound, in ascending order.
    #[must_use]
    pub fn bound_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.shared.ports.lock().bound.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

impl Engine for LoopbackEngine {
    fn create_server(&self, args: &ChannelArgs) -> Box<dyn NativeServer> {
        let id = self.shared.next_server_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(native_server = id, args = args.len(), "Loopback server created");
        Box::new(LoopbackServer::new(id, args.clone(), Arc::clone(&self.shared)))
    }
}

/// A connection to a loopback server.
#[derive(Debug, Clone)]
pub struct LoopbackClient {
    server: Arc<ServerShared>,
    port: u16,
    secure: bool,
}

impl LoopbackClient {
    /// Sends an inbound call.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Unavailable`] unless the server is started and
    /// not shutting down.
    pub fn start_call(&self, call: InboundCall) -> Result<ClientCall, DialError> {
        self.server.accept_inbound(call)
    }

    /// The dialed port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the port was bound with credentials.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Calls currently matched and not yet ended.
    #[must_use]
    pub fn in_flight_calls(&self) -> usize {
        self.server.in_flight()
    }

    /// Accept requests waiting for a call.
    #[must_use]
    pub fn pending_accepts(&self) -> usize {
        self.server.pending_accepts()
    }

    /// Options the server was created with.
    #[must_use]
    pub fn server_args(&self) -> ChannelArgs {
        self.server.args().clone()
    }
}

/// Splits `host:port` and returns the port.
///
/// Accepts bracketed IPv6 hosts (`[::]:50051`) and plain host names.
pub(crate) fn parse_port(address: &str) -> Option<u16> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    port.parse().ok()
}

//! The server lifecycle.
//!
//! ```text
//! Created ──start──► Started ──try_shutdown / force_shutdown──► ShuttingDown ──confirmed──► Shutdown
//!    └──────────────────── try_shutdown / force_shutdown ──────────────┘
//! ```
//!
//! A started server keeps itself alive through a root in the
//! [`HostContext`](crate::HostContext), so it keeps serving after the
//! application drops its last handle. The root is released exactly once,
//! when the engine confirms shutdown.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use callbridge_core::ChannelArgs;
use callbridge_engine::{CallSlot, Engine, NativeServer, ServerCredentials};
use callbridge_telemetry::metrics::record_shutdown;
use callbridge_telemetry::ShutdownMode;
use serde_json::Value;

use crate::batch::OperationBatch;
use crate::call::IncomingCall;
use crate::error::{ServerError, ServerResult};
use crate::host::RootToken;
use crate::op::{NewCallOp, OpValue, ShutdownNotifyOp};
use crate::queue::CompletionQueue;

static NEXT_SERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Created; ports may be added.
    Created,
    /// Accepting calls.
    Started,
    /// Shutdown requested, waiting for the engine to confirm.
    ShuttingDown,
    /// Terminal.
    Shutdown,
}

impl ServerState {
    /// Returns `true` only in the terminal state.
    pub fn is_shutdown(self) -> bool {
        self == Self::Shutdown
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::ShuttingDown => "shutting_down",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ShutdownWaiter = Box<dyn FnOnce(ServerResult<()>)>;

struct ServerInner {
    id: u64,
    queue: CompletionQueue,
    native: Box<dyn NativeServer>,
    state: Cell<ServerState>,
    keep_alive: RefCell<Option<RootToken>>,
    waiters: RefCell<Vec<ShutdownWaiter>>,
}

impl ServerInner {
    /// Runs when the engine confirmed shutdown, before any waiter.
    fn finish_shutdown(&self) {
        if self.state.replace(ServerState::Shutdown) == ServerState::Shutdown {
            return;
        }
        let token = self.keep_alive.borrow_mut().take();
        if let Some(token) = token {
            self.queue.host().release(token);
        }
        tracing::info!(server_id = self.id, "Server shut down");
    }

    /// Runs when the queue closed before the engine could confirm shutdown.
    ///
    /// The confirmation can no longer arrive, so the server stays
    /// `ShuttingDown` but stops rooting itself on the host.
    fn abandon_shutdown(&self) {
        let token = self.keep_alive.borrow_mut().take();
        if let Some(token) = token {
            self.queue.host().release(token);
            tracing::warn!(server_id = self.id, "Queue closed before shutdown was confirmed");
        }
    }

    fn notify_waiters(&self, result: &ServerResult<()>) {
        let waiters = mem::take(&mut *self.waiters.borrow_mut());
        tracing::debug!(server_id = self.id, waiters = waiters.len(), ok = result.is_ok(), "Shutdown completed");
        for waiter in waiters {
            waiter(result.clone());
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        tracing::debug!(server_id = self.id, state = %self.state.get(), "Native server destroyed");
    }
}

/// An RPC server bound to a [`CompletionQueue`].
///
/// Cloning is cheap; clones are handles to the same server. Every method
/// must be called on the host thread.
///
/// # Example
///
/// ```
/// use callbridge_core::ChannelArgs;
/// use callbridge_engine::loopback::{InboundCall, LoopbackEngine};
/// use callbridge_server::{CompletionQueue, HostContext, QueueOptions, Server};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let host = HostContext::new();
/// let queue = CompletionQueue::new(&host, QueueOptions::manual()).unwrap();
/// let engine = LoopbackEngine::new();
///
/// let server = Server::create(&queue, &engine, &ChannelArgs::new());
/// let port = server.add_port("127.0.0.1:0", None).unwrap();
/// server.start();
///
/// let accepted = Rc::new(RefCell::new(None));
/// let slot = Rc::clone(&accepted);
/// server.request_call(move |call| *slot.borrow_mut() = Some(call.unwrap().method));
///
/// engine.dial(port).unwrap().start_call(InboundCall::new("/echo.Echo/Say")).unwrap();
/// queue.run_until_idle();
/// assert_eq!(accepted.borrow().as_deref(), Some("/echo.Echo/Say"));
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Rc<ServerInner>,
}

impl Server {
    /// Creates a server with already-validated arguments.
    pub fn create(queue: &CompletionQueue, engine: &dyn Engine, args: &ChannelArgs) -> Self {
        let native = engine.create_server(args);
        native.register_completion_queue(queue.native());
        let id = NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(server_id = id, args = args.len(), "Server created");
        Self {
            inner: Rc::new(ServerInner {
                id,
                queue: queue.clone(),
                native,
                state: Cell::new(ServerState::Created),
                keep_alive: RefCell::new(None),
                waiters: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Creates a server from loosely typed options.
    ///
    /// `options` must be `null` or an object whose values are integers or
    /// strings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Configuration`] for any other shape; the engine
    /// is not touched in that case.
    pub fn from_options(
        queue: &CompletionQueue,
        engine: &dyn Engine,
        options: &Value,
    ) -> ServerResult<Self> {
        let args = ChannelArgs::from_value(options).map_err(|e| {
            tracing::warn!(error = %e, "Rejected server options");
            ServerError::from(e)
        })?;
        Ok(Self::create(queue, engine, &args))
    }

    /// Process-unique server id used in logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.state.get()
    }

    /// Returns `true` once the engine confirmed shutdown.
    pub fn is_shutdown(&self) -> bool {
        self.state().is_shutdown()
    }

    /// Returns `true` while the server keeps itself alive in the host root set.
    pub fn holds_keep_alive(&self) -> bool {
        self.inner.keep_alive.borrow().is_some()
    }

    /// The queue this server reports completions to.
    pub fn queue(&self) -> &CompletionQueue {
        &self.inner.queue
    }

    /// Binds a listening port: insecure without credentials, secure with.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::PortBind`] if the engine could not bind. A
    /// failed bind is never returned as a port number.
    pub fn add_port(&self, address: &str, credentials: Option<&ServerCredentials>) -> ServerResult<u16> {
        let port = match credentials {
            None => self.inner.native.add_insecure_port(address),
            Some(credentials) => self.inner.native.add_secure_port(address, credentials),
        };
        if port == 0 {
            tracing::warn!(server_id = self.inner.id, address, "Failed to bind port");
            return Err(ServerError::PortBind {
                address: address.to_string(),
            });
        }
        tracing::info!(
            server_id = self.inner.id,
            address,
            port,
            secure = credentials.is_some(),
            "Port bound"
        );
        Ok(port)
    }

    /// Starts accepting calls. Only the first call from `Created` has an effect.
    pub fn start(&self) {
        let state = self.state();
        if state != ServerState::Created {
            tracing::debug!(server_id = self.inner.id, %state, "Start ignored");
            return;
        }
        self.inner.native.start();
        self.inner.state.set(ServerState::Started);
        let root: Rc<dyn Any> = Rc::clone(&self.inner) as Rc<dyn Any>;
        let token = self.inner.queue.host().retain(root);
        *self.inner.keep_alive.borrow_mut() = Some(token);
        tracing::info!(server_id = self.inner.id, "Server started");
    }

    /// Requests exactly one inbound call.
    ///
    /// `handler` runs on the host with the accepted call, with
    /// [`ServerError::Cancelled`] if shutdown failed or overtook the request,
    /// or with [`ServerError::CallRequest`] if the engine refused it. Issue
    /// another request from the handler to keep accepting.
    pub fn request_call(&self, handler: impl FnOnce(ServerResult<IncomingCall>) + 'static) {
        let slot = CallSlot::new();
        let op = NewCallOp::new(slot.clone(), self.inner.queue.clone());
        let batch = OperationBatch::single(op, move |result| {
            handler(result.and_then(|values| {
                values
                    .into_iter()
                    .find_map(OpValue::into_call)
                    .ok_or_else(|| ServerError::parse(NewCallOp::KIND, "batch produced no call"))
            }));
        });
        let Some(tag) = self.inner.queue.register(batch) else {
            return;
        };
        if let Err(code) = self.inner.native.request_call(slot, tag) {
            tracing::debug!(server_id = self.inner.id, %tag, error = %code, "Call request refused");
            self.inner.queue.abandon(tag, code.into());
        }
    }

    /// Starts a graceful shutdown: no new calls, in-flight calls may finish.
    ///
    /// `on_done` runs once the engine confirmed, after the server reached
    /// `Shutdown`. Calling this while a shutdown is already in progress
    /// starts nothing new; `on_done` then waits for that shutdown.
    pub fn try_shutdown(&self, on_done: impl FnOnce(ServerResult<()>) + 'static) {
        match self.state() {
            ServerState::Created | ServerState::Started => {
                self.begin_shutdown(ShutdownMode::Graceful, Some(Box::new(on_done)));
            }
            ServerState::ShuttingDown => {
                tracing::debug!(server_id = self.inner.id, "Shutdown already in progress");
                if self.inner.queue.is_closed() {
                    self.inner
                        .queue
                        .host()
                        .schedule(move || on_done(Err(ServerError::QueueClosed)));
                } else {
                    self.inner.waiters.borrow_mut().push(Box::new(on_done));
                }
            }
            ServerState::Shutdown => {
                tracing::debug!(server_id = self.inner.id, "Server already shut down");
                self.inner.queue.host().schedule(move || on_done(Ok(())));
            }
        }
    }

    /// Shuts down and cancels every in-flight call immediately.
    ///
    /// During a graceful shutdown this only cancels the in-flight calls; the
    /// pending notification completes it.
    pub fn force_shutdown(&self) {
        match self.state() {
            ServerState::Created | ServerState::Started => {
                self.begin_shutdown(ShutdownMode::Forced, None);
                self.inner.native.cancel_all_calls();
            }
            ServerState::ShuttingDown => {
                tracing::info!(server_id = self.inner.id, "Escalating to forced shutdown");
                record_shutdown(ShutdownMode::Forced);
                self.inner.native.cancel_all_calls();
            }
            ServerState::Shutdown => {
                tracing::debug!(server_id = self.inner.id, "Server already shut down");
            }
        }
    }

    fn begin_shutdown(&self, mode: ShutdownMode, waiter: Option<ShutdownWaiter>) {
        self.inner.state.set(ServerState::ShuttingDown);
        record_shutdown(mode);
        tracing::info!(server_id = self.inner.id, mode = mode.as_str(), "Server shutting down");
        if let Some(waiter) = waiter {
            self.inner.waiters.borrow_mut().push(waiter);
        }

        let confirmed = Rc::clone(&self.inner);
        let notified = Rc::clone(&self.inner);
        let op = ShutdownNotifyOp::new(move || confirmed.finish_shutdown());
        let batch = OperationBatch::single(op, move |result| {
            let result = match result {
                Err(_) if notified.queue.is_closed() => {
                    notified.abandon_shutdown();
                    Err(ServerError::QueueClosed)
                }
                other => other.map(drop),
            };
            notified.notify_waiters(&result);
        });
        if let Some(tag) = self.inner.queue.register(batch) {
            self.inner.native.shutdown_and_notify(tag);
        }
    }

    /// Returns a handle that does not keep the server alive.
    pub fn downgrade(&self) -> WeakServer {
        WeakServer {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("keep_alive", &self.holds_keep_alive())
            .field("native", &self.inner.native)
            .finish()
    }
}

/// Non-owning handle to a [`Server`].
#[derive(Clone)]
pub struct WeakServer {
    inner: Weak<ServerInner>,
}

impl WeakServer {
    /// Returns the server if it is still alive.
    pub fn upgrade(&self) -> Option<Server> {
        self.inner.upgrade().map(|inner| Server { inner })
    }
}

impl fmt::Debug for WeakServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakServer")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostContext;
    use crate::queue::QueueOptions;
    use bytes::Bytes;
    use callbridge_core::RawTimespec;
    use callbridge_engine::loopback::{CallStatus, InboundCall, LoopbackEngine};
    use callbridge_engine::{CallErrorCode, KeyCertPair};
    use serde_json::json;

    type Outcomes<T> = Rc<RefCell<Vec<ServerResult<T>>>>;

    struct Fixture {
        host: HostContext,
        queue: CompletionQueue,
        engine: LoopbackEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let host = HostContext::new();
            let queue = CompletionQueue::new(&host, QueueOptions::manual()).unwrap();
            Self {
                host,
                queue,
                engine: LoopbackEngine::new(),
            }
        }

        fn started_server(&self) -> (Server, u16) {
            let server = Server::create(&self.queue, &self.engine, &ChannelArgs::new());
            let port = server.add_port("127.0.0.1:0", None).unwrap();
            server.start();
            (server, port)
        }
    }

    fn collect<T: 'static>(outcomes: &Outcomes<T>) -> impl FnOnce(ServerResult<T>) + 'static {
        let outcomes = Rc::clone(outcomes);
        move |result| outcomes.borrow_mut().push(result)
    }

    fn accept_calls(fx: &Fixture, server: &Server, port: u16, count: usize) -> Vec<IncomingCall> {
        let accepted: Outcomes<IncomingCall> = Rc::default();
        let client = fx.engine.dial(port).unwrap();
        for i in 0..count {
            server.request_call(collect(&accepted));
            client.start_call(InboundCall::new(format!("/svc/M{i}"))).unwrap();
        }
        fx.queue.run_until_idle();
        let calls: Vec<IncomingCall> = accepted.borrow_mut().drain(..).map(Result::unwrap).collect();
        assert_eq!(calls.len(), count);
        calls
    }

    #[test]
    fn test_from_options_rejects_malformed_shapes() {
        let fx = Fixture::new();
        for options in [
            json!([1, 2]),
            json!("grpc.max_concurrent_streams"),
            json!(42),
            json!({"grpc.keepalive_time_ms": 1.5}),
            json!({"grpc.primary_user_agent": true}),
            json!({"nested": {"a": 1}}),
        ] {
            let result = Server::from_options(&fx.queue, &fx.engine, &options);
            assert!(
                matches!(result, Err(ServerError::Configuration(_))),
                "accepted {options}"
            );
        }
        assert_eq!(fx.engine.servers_created(), 0);
    }

    #[test]
    fn test_from_options_accepts_null_and_flat_objects() {
        let fx = Fixture::new();
        Server::from_options(&fx.queue, &fx.engine, &Value::Null).unwrap();
        let server = Server::from_options(
            &fx.queue,
            &fx.engine,
            &json!({"grpc.max_concurrent_streams": 10, "grpc.primary_user_agent": "test"}),
        )
        .unwrap();
        let port = server.add_port("127.0.0.1:0", None).unwrap();
        server.start();

        let args = fx.engine.dial(port).unwrap().server_args();
        assert_eq!(args.get_int("grpc.max_concurrent_streams"), Some(10));
        assert_eq!(args.get_str("grpc.primary_user_agent"), Some("test"));
        assert_eq!(fx.engine.servers_created(), 2);
    }

    #[test]
    fn test_add_port_failures_are_errors() {
        let fx = Fixture::new();
        let first = Server::create(&fx.queue, &fx.engine, &ChannelArgs::new());
        let second = Server::create(&fx.queue, &fx.engine, &ChannelArgs::new());

        assert_eq!(first.add_port("0.0.0.0:6000", None).unwrap(), 6000);
        assert_eq!(
            second.add_port("0.0.0.0:6000", None),
            Err(ServerError::PortBind {
                address: "0.0.0.0:6000".to_string()
            })
        );

        let no_pairs = ServerCredentials::new(None, Vec::new(), false);
        assert!(second.add_port("0.0.0.0:0", Some(&no_pairs)).is_err());

        let creds = ServerCredentials::new(
            None,
            vec![KeyCertPair {
                private_key: Bytes::from_static(b"key"),
                cert_chain: Bytes::from_static(b"cert"),
            }],
            false,
        );
        let secure = second.add_port("0.0.0.0:0", Some(&creds)).unwrap();
        second.start();
        assert!(fx.engine.dial(secure).unwrap().is_secure());
        assert!(second.add_port("0.0.0.0:0", None).is_err());
    }

    #[test]
    fn test_request_call_delivers_call_data() {
        let fx = Fixture::new();
        let server = Server::create(&fx.queue, &fx.engine, &ChannelArgs::new());
        let port = server.add_port("127.0.0.1:0", None).unwrap();

        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));
        server.start();

        fx.engine
            .dial(port)
            .unwrap()
            .start_call(
                InboundCall::new("/helloworld.Greeter/SayHello")
                    .host("greeter.test:443")
                    .deadline(RawTimespec::realtime(1_800_000_000, 0))
                    .header("x-request-id", Bytes::from_static(b"abc"))
                    .header("X-Multi", Bytes::from_static(b"1"))
                    .header("x-multi", Bytes::from_static(b"2")),
            )
            .unwrap();
        fx.queue.run_until_idle();

        let outcomes = accepted.borrow();
        assert_eq!(outcomes.len(), 1);
        let call = outcomes[0].as_ref().unwrap();
        assert_eq!(call.method, "/helloworld.Greeter/SayHello");
        assert_eq!(call.host, "greeter.test:443");
        assert_eq!(call.deadline.millis_since_epoch(), Some(1_800_000_000_000));
        assert_eq!(call.metadata.get("x-request-id").unwrap().as_ref(), b"abc");
        assert_eq!(
            call.metadata.get_all("x-multi"),
            &[Bytes::from_static(b"1"), Bytes::from_static(b"2")]
        );
    }

    #[test]
    fn test_malformed_metadata_is_parse_error() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));

        let client = fx.engine.dial(port).unwrap();
        let sent = client
            .start_call(InboundCall::new("/svc/M").raw_header(":authority", "x"))
            .unwrap();
        fx.queue.run_until_idle();

        assert!(matches!(
            accepted.borrow()[0],
            Err(ServerError::OperationParse { op: "new_call", .. })
        ));
        assert_eq!(sent.status(), CallStatus::Cancelled);
        assert_eq!(client.in_flight_calls(), 0);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        server.start();
        assert_eq!(server.state(), ServerState::Started);
        assert_eq!(fx.host.root_count(), 1);
    }

    #[test]
    fn test_keep_alive_held_while_serving() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let weak = server.downgrade();
        assert!(server.holds_keep_alive());
        drop(server);

        let server = weak.upgrade().expect("started server stays rooted");
        server.try_shutdown(|_| {});
        fx.queue.run_until_idle();
        assert!(!server.holds_keep_alive());
        assert_eq!(fx.host.root_count(), 0);

        drop(server);
        assert!(weak.upgrade().is_none());
        assert_eq!(fx.engine.servers_destroyed(), 1);
    }

    #[test]
    fn test_try_shutdown_without_calls() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let done: Outcomes<()> = Rc::default();
        let observed = Rc::new(Cell::new(None));

        let seen = Rc::clone(&observed);
        let watcher = server.clone();
        let outcomes = Rc::clone(&done);
        server.try_shutdown(move |result| {
            seen.set(Some(watcher.is_shutdown()));
            outcomes.borrow_mut().push(result);
        });
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(done.borrow().is_empty());

        fx.queue.run_until_idle();
        assert_eq!(*done.borrow(), vec![Ok(())]);
        assert_eq!(observed.get(), Some(true));
        assert!(server.is_shutdown());
    }

    #[test]
    fn test_graceful_shutdown_waits_for_in_flight_call() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let calls = accept_calls(&fx, &server, port, 1);

        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.queue.run_until_idle();
        assert!(done.borrow().is_empty());
        assert!(!server.is_shutdown());

        calls[0].call.finish().unwrap();
        fx.queue.run_until_idle();
        assert_eq!(*done.borrow(), vec![Ok(())]);
        assert!(server.is_shutdown());
    }

    #[test]
    fn test_pending_request_cancelled_by_shutdown() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));

        server.try_shutdown(|_| {});
        fx.queue.run_until_idle();
        assert_eq!(accepted.borrow().len(), 1);
        assert!(matches!(accepted.borrow()[0], Err(ServerError::Cancelled)));
    }

    #[test]
    fn test_request_call_after_shutdown_fails_asynchronously() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        server.try_shutdown(|_| {});
        fx.queue.run_until_idle();

        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));
        assert!(accepted.borrow().is_empty());
        fx.queue.run_until_idle();
        assert!(matches!(
            accepted.borrow()[0],
            Err(ServerError::CallRequest {
                code: CallErrorCode::ServerShutdown
            })
        ));
    }

    #[test]
    fn test_force_shutdown_cancels_in_flight_calls() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let calls = accept_calls(&fx, &server, port, 3);

        let closed: Outcomes<()> = Rc::default();
        for incoming in &calls {
            incoming.call.on_close(collect(&closed));
        }
        server.force_shutdown();
        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.queue.run_until_idle();

        assert_eq!(
            *closed.borrow(),
            vec![
                Err(ServerError::Cancelled),
                Err(ServerError::Cancelled),
                Err(ServerError::Cancelled)
            ]
        );
        assert!(calls.iter().all(|incoming| incoming.call.is_cancelled()));
        assert_eq!(*done.borrow(), vec![Ok(())]);
        assert!(server.is_shutdown());
    }

    #[test]
    fn test_force_escalates_graceful_shutdown() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let calls = accept_calls(&fx, &server, port, 1);

        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.queue.run_until_idle();
        assert!(done.borrow().is_empty());

        server.force_shutdown();
        fx.queue.run_until_idle();
        assert_eq!(*done.borrow(), vec![Ok(())]);
        assert!(calls[0].call.is_cancelled());

        server.force_shutdown();
        fx.queue.run_until_idle();
        assert_eq!(done.borrow().len(), 1);
        assert_eq!(fx.queue.pending(), 0);
    }

    #[test]
    fn test_duplicate_try_shutdown_waits_for_first() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let first: Outcomes<()> = Rc::default();
        let second: Outcomes<()> = Rc::default();

        server.try_shutdown(collect(&first));
        server.try_shutdown(collect(&second));
        // Only one notification is outstanding.
        assert_eq!(fx.queue.pending(), 1);

        fx.queue.run_until_idle();
        assert_eq!(*first.borrow(), vec![Ok(())]);
        assert_eq!(*second.borrow(), vec![Ok(())]);

        let late: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&late));
        fx.queue.run_until_idle();
        assert_eq!(*late.borrow(), vec![Ok(())]);
        assert_eq!(fx.host.root_count(), 0);
    }

    #[test]
    fn test_shutdown_before_start() {
        let fx = Fixture::new();
        let server = Server::create(&fx.queue, &fx.engine, &ChannelArgs::new());
        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.queue.run_until_idle();

        assert_eq!(*done.borrow(), vec![Ok(())]);
        assert!(server.is_shutdown());
        server.start();
        assert_eq!(server.state(), ServerState::Shutdown);
        assert!(!server.holds_keep_alive());
    }

    #[test]
    fn test_matched_call_overtaken_by_force_shutdown() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));

        // Matched by the engine, completion not yet dispatched.
        let sent = fx
            .engine
            .dial(port)
            .unwrap()
            .start_call(InboundCall::new("/svc/Race"))
            .unwrap();
        assert_eq!(fx.queue.pending(), 1);

        server.force_shutdown();
        fx.queue.run_until_idle();

        assert!(matches!(accepted.borrow()[0], Err(ServerError::Cancelled)));
        assert_eq!(sent.status(), CallStatus::Cancelled);
        assert!(server.is_shutdown());
    }

    #[test]
    fn test_finish_twice_fails() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let calls = accept_calls(&fx, &server, port, 1);
        let call = &calls[0].call;

        let closed: Outcomes<()> = Rc::default();
        call.on_close(collect(&closed));
        call.finish().unwrap();
        assert_eq!(
            call.finish(),
            Err(ServerError::CallRequest {
                code: CallErrorCode::AlreadyFinished
            })
        );
        fx.queue.run_until_idle();
        assert_eq!(*closed.borrow(), vec![Ok(())]);

        // Registering after the call ended still completes once.
        call.on_close(collect(&closed));
        fx.queue.run_until_idle();
        assert_eq!(closed.borrow().len(), 2);
    }

    #[test]
    fn test_queue_close_fails_outstanding_requests() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let accepted: Outcomes<IncomingCall> = Rc::default();
        server.request_call(collect(&accepted));

        fx.queue.close();
        assert!(matches!(accepted.borrow()[0], Err(ServerError::Cancelled)));

        server.request_call(collect(&accepted));
        fx.queue.run_until_idle();
        assert!(matches!(accepted.borrow()[1], Err(ServerError::QueueClosed)));
    }

    #[test]
    fn test_shutdown_on_closed_queue_releases_server() {
        let fx = Fixture::new();
        let (server, _) = fx.started_server();
        let weak = server.downgrade();
        fx.queue.close();

        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.host.run_pending();
        assert_eq!(*done.borrow(), vec![Err(ServerError::QueueClosed)]);
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(!server.holds_keep_alive());
        assert_eq!(fx.host.root_count(), 0);

        drop(server);
        assert!(weak.upgrade().is_none());
        assert_eq!(fx.engine.servers_destroyed(), 1);
    }

    #[test]
    fn test_queue_close_during_shutdown_releases_server() {
        let fx = Fixture::new();
        let (server, port) = fx.started_server();
        let calls = accept_calls(&fx, &server, port, 1);
        let weak = server.downgrade();

        let done: Outcomes<()> = Rc::default();
        server.try_shutdown(collect(&done));
        fx.queue.run_until_idle();
        assert!(done.borrow().is_empty());

        fx.queue.close();
        assert_eq!(*done.borrow(), vec![Err(ServerError::QueueClosed)]);
        assert!(!server.holds_keep_alive());
        assert_eq!(fx.host.root_count(), 0);

        drop(calls);
        drop(server);
        assert!(weak.upgrade().is_none());
        assert_eq!(fx.engine.servers_destroyed(), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServerState::ShuttingDown.to_string(), "shutting_down");
        assert!(ServerState::Shutdown.is_shutdown());
        assert!(!ServerState::Started.is_shutdown());
    }
}

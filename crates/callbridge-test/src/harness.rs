//! In-process server fixture.

use std::future::Future;
use std::time::Duration;

use callbridge_core::ChannelArgs;
use callbridge_engine::loopback::{ClientCall, LoopbackClient, LoopbackEngine};
use callbridge_server::{
    CompletionQueue, HostContext, IncomingCall, QueueOptions, Server, ServerResult,
};

use crate::call::TestCall;
use crate::error::{TestError, TestResult};
use crate::recorder::Recorder;

/// Address bound by [`TestHarness::started_server`].
pub const TEST_ADDRESS: &str = "127.0.0.1:0";

/// A host context, a completion queue and a loopback engine wired together.
///
/// The default harness drains its queue on the calling thread, so every
/// completion is dispatched by [`settle`](Self::settle) and tests stay fully
/// deterministic. [`with_workers`](Self::with_workers) runs real worker
/// threads instead; drive it with [`wait_for`](Self::wait_for) inside a
/// Tokio runtime.
///
/// # Example
///
/// ```
/// use callbridge_test::{TestCall, TestHarness};
///
/// let harness = TestHarness::new();
/// let (server, client) = harness.started_server().unwrap();
///
/// let call = TestCall::new("/echo.Echo/Say").header("x-id", "1");
/// let incoming = harness.accept(&server, &client, call.clone()).unwrap();
/// call.assert_delivered(&incoming);
/// incoming.call.finish().unwrap();
///
/// assert!(harness.shutdown(&server).is_ok());
/// assert!(server.is_shutdown());
/// ```
#[derive(Debug)]
pub struct TestHarness {
    host: HostContext,
    queue: CompletionQueue,
    engine: LoopbackEngine,
}

impl TestHarness {
    /// Creates a harness whose queue is drained manually.
    pub fn new() -> Self {
        let host = HostContext::new();
        // Manual queues spawn no threads, so creation cannot fail.
        let queue = CompletionQueue::new(&host, QueueOptions::manual())
            .expect("manual completion queue");
        Self {
            host,
            queue,
            engine: LoopbackEngine::new(),
        }
    }

    /// Creates a harness with `workers` completion-queue threads.
    pub fn with_workers(workers: usize) -> TestResult<Self> {
        let host = HostContext::new();
        let options = QueueOptions {
            worker_threads: workers,
            poll_interval: Duration::from_millis(10),
        };
        let queue = CompletionQueue::new(&host, options)?;
        Ok(Self {
            host,
            queue,
            engine: LoopbackEngine::new(),
        })
    }

    /// The host context.
    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// The completion queue.
    pub fn queue(&self) -> &CompletionQueue {
        &self.queue
    }

    /// The loopback engine.
    pub fn engine(&self) -> &LoopbackEngine {
        &self.engine
    }

    /// Creates a server with no channel options.
    pub fn server(&self) -> Server {
        self.server_with_args(&ChannelArgs::new())
    }

    /// Creates a server with `args`.
    pub fn server_with_args(&self, args: &ChannelArgs) -> Server {
        Server::create(&self.queue, &self.engine, args)
    }

    /// Creates a server, binds an ephemeral insecure port, starts it and
    /// dials it.
    pub fn started_server(&self) -> TestResult<(Server, LoopbackClient)> {
        let server = self.server();
        let port = server.add_port(TEST_ADDRESS, None)?;
        server.start();
        let client = self.engine.dial(port)?;
        Ok((server, client))
    }

    /// Sends `call` through `client`.
    pub fn send(&self, client: &LoopbackClient, call: TestCall) -> TestResult<ClientCall> {
        Ok(client.start_call(call.into_inbound())?)
    }

    /// Dispatches every ready completion and deferred task.
    ///
    /// Returns the amount of work processed.
    pub fn settle(&self) -> usize {
        self.queue.run_until_idle()
    }

    /// Requests one call, sends `call` and returns what the handler received.
    ///
    /// Only valid on a manually drained harness.
    pub fn accept(
        &self,
        server: &Server,
        client: &LoopbackClient,
        call: TestCall,
    ) -> TestResult<IncomingCall> {
        let accepted: Recorder<ServerResult<IncomingCall>> = Recorder::new();
        server.request_call(accepted.callback());
        self.send(client, call)?;
        self.settle();
        Ok(accepted.take_one()?)
    }

    /// Gracefully shuts `server` down and returns the `on_done` result.
    ///
    /// Only valid on a manually drained harness with no in-flight calls.
    pub fn shutdown(&self, server: &Server) -> TestResult<()> {
        let done: Recorder<ServerResult<()>> = Recorder::new();
        server.try_shutdown(done.callback());
        self.settle();
        Ok(done.take_one()?)
    }

    /// Turns the queue until `done` returns `true`.
    ///
    /// Must be awaited inside a Tokio runtime.
    pub async fn wait_for(&self, done: impl FnMut() -> bool, timeout: Duration) -> TestResult<()> {
        match tokio::time::timeout(timeout, self.queue.drive_until(done)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TestError::Timeout(timeout)),
        }
    }

    /// Runs `future` to completion on a fresh current-thread runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("tokio runtime")
            .block_on(future)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

//! A configured server with its own host context and completion queue.

use std::cell::RefCell;
use std::rc::Rc;

use callbridge_config::CallbridgeConfig;
use callbridge_core::CoreError;
use callbridge_engine::Engine;
use callbridge_server::{
    CompletionQueue, HostContext, QueueOptions, Server, ServerError, ServerResult,
};

/// A server created from a [`CallbridgeConfig`] and bound to its ports.
///
/// # Example
///
/// ```
/// use callbridge::config::CallbridgeConfig;
/// use callbridge::engine::loopback::LoopbackEngine;
/// use callbridge::Endpoint;
///
/// let config = CallbridgeConfig::builder().port("127.0.0.1:0").build();
/// let engine = LoopbackEngine::new();
///
/// let endpoint = Endpoint::from_config(&config, &engine).unwrap();
/// assert_eq!(endpoint.ports().len(), 1);
/// ```
#[derive(Debug)]
pub struct Endpoint {
    host: HostContext,
    queue: CompletionQueue,
    server: Server,
    ports: Vec<u16>,
}

impl Endpoint {
    /// Creates the queue and the server described by `config` and binds
    /// every configured port with insecure credentials.
    ///
    /// The server is not started.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Configuration`] if `config` does not validate,
    /// [`ServerError::WorkerSpawn`] if the queue workers cannot be started
    /// and [`ServerError::PortBind`] for the first address the engine
    /// refuses. Nothing is left running on error.
    pub fn from_config(config: &CallbridgeConfig, engine: &dyn Engine) -> ServerResult<Self> {
        config
            .validate()
            .map_err(|e| ServerError::Configuration(CoreError::configuration(e.to_string())))?;

        let host = HostContext::new();
        let queue = CompletionQueue::new(&host, QueueOptions::from(&config.runtime))?;
        let server = Server::create(&queue, engine, &config.server.options);

        let mut ports = Vec::with_capacity(config.server.ports.len());
        for address in &config.server.ports {
            match server.add_port(address, None) {
                Ok(port) => ports.push(port),
                Err(e) => {
                    queue.close();
                    return Err(e);
                }
            }
        }

        tracing::info!(
            server_id = server.id(),
            ports = ?ports,
            workers = config.runtime.worker_threads,
            "Endpoint ready"
        );
        Ok(Self {
            host,
            queue,
            server,
            ports,
        })
    }

    /// The host context callbacks run on.
    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// The completion queue.
    pub fn queue(&self) -> &CompletionQueue {
        &self.queue
    }

    /// The server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Bound ports, in configuration order.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Starts the server.
    pub fn start(&self) {
        self.server.start();
    }

    /// Shuts the server down gracefully and turns the queue until the
    /// engine confirms.
    ///
    /// # Errors
    ///
    /// Returns the error delivered to the shutdown callback, or
    /// [`ServerError::QueueClosed`] if the queue closes first.
    pub async fn shutdown(&self) -> ServerResult<()> {
        let outcome: Rc<RefCell<Option<ServerResult<()>>>> = Rc::default();
        let slot = Rc::clone(&outcome);
        self.server.try_shutdown(move |result| *slot.borrow_mut() = Some(result));
        self.queue.drive_until(|| outcome.borrow().is_some()).await?;
        let result = outcome.borrow_mut().take();
        result.unwrap_or(Err(ServerError::QueueClosed))
    }

    /// Cancels every in-flight call, then waits like [`shutdown`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// Same as [`shutdown`](Self::shutdown).
    pub async fn shutdown_now(&self) -> ServerResult<()> {
        self.server.force_shutdown();
        self.shutdown().await
    }

    /// Closes the completion queue, failing every batch still pending.
    pub fn close(&self) {
        self.queue.close();
    }
}

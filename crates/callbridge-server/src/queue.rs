//! The completion queue.
//!
//! `CompletionQueue` sits between the blocking [`NativeQueue`] and the host.
//! Every asynchronous operation registers an [`OperationBatch`] and receives a
//! fresh [`Tag`]; the engine later posts that tag, a worker thread forwards it
//! to the host, and [`dispatch`](CompletionQueue::dispatch) resolves the batch
//! and runs its callback, all on the host thread.
//!
//! ```text
//!  engine ──post(tag)──► NativeQueue ──next()──► worker ──mpsc──► host
//!                                                                   │
//!                                          dispatch(tag) ◄──────────┘
//!                                               │
//!                                     OperationBatch::complete ─► callback
//! ```
//!
//! With `worker_threads = 0` there are no workers: the host polls the native
//! queue itself in [`run_until_idle`](CompletionQueue::run_until_idle), which
//! makes every interleaving reproducible in tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use callbridge_config::RuntimeConfig;
use callbridge_engine::{NativeQueue, QueueEvent, Tag};
use callbridge_telemetry::metrics::{record_batch_completed, set_pending_batches};
use callbridge_telemetry::BatchOutcome;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::batch::OperationBatch;
use crate::error::{ServerError, ServerResult};
use crate::host::HostContext;
use crate::worker::{Completion, WorkerPool};

/// Default worker poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Completion queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Worker threads blocking on the native queue. `0` selects manual
    /// draining from the host.
    pub worker_threads: usize,
    /// How long a worker blocks before checking whether it should exit.
    pub poll_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl QueueOptions {
    /// No worker threads; the host drains the native queue itself.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            worker_threads: 0,
            ..Self::default()
        }
    }

    /// Returns `true` when no worker threads are used.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.worker_threads == 0
    }
}

impl From<&RuntimeConfig> for QueueOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            worker_threads: config.worker_threads,
            poll_interval: config.poll_interval(),
        }
    }
}

struct QueueInner {
    host: HostContext,
    native: Arc<NativeQueue>,
    options: QueueOptions,
    batches: RefCell<HashMap<Tag, OperationBatch>>,
    next_ticket: Cell<u64>,
    workers: RefCell<Option<WorkerPool>>,
    receiver: RefCell<Option<UnboundedReceiver<Completion>>>,
    receiving: Cell<bool>,
    closed: Cell<bool>,
}

/// Clears the receiving flag when a waiting turn finishes or is dropped.
struct ReceivingGuard<'a>(&'a Cell<bool>);

impl Drop for ReceivingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Maps tags to pending batches and dispatches completions on the host.
///
/// Cloning is cheap; clones share the same queue.
///
/// # Example
///
/// ```
/// use callbridge_engine::CallId;
/// use callbridge_server::{CloseNotifyOp, CompletionQueue, HostContext, OperationBatch, QueueOptions};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let host = HostContext::new();
/// let queue = CompletionQueue::new(&host, QueueOptions::manual()).unwrap();
///
/// let closed = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&closed);
/// let batch = OperationBatch::single(CloseNotifyOp::new(CallId(1)), move |result| {
///     flag.set(result.is_ok());
/// });
/// let tag = queue.register(batch).unwrap();
///
/// // Normally the engine posts the tag.
/// queue.native().post(tag, true);
/// queue.run_until_idle();
/// assert!(closed.get());
/// assert_eq!(queue.pending(), 0);
/// ```
#[derive(Clone)]
pub struct CompletionQueue {
    inner: Rc<QueueInner>,
}

impl CompletionQueue {
    /// Creates a queue bound to `host`, spawning its worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::WorkerSpawn`] if a worker thread cannot be
    /// started.
    pub fn new(host: &HostContext, options: QueueOptions) -> ServerResult<Self> {
        let native = Arc::new(NativeQueue::new());
        let (workers, receiver) = if options.is_manual() {
            (None, None)
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            let pool =
                WorkerPool::spawn(options.worker_threads, &native, options.poll_interval, &sender)?;
            (Some(pool), Some(receiver))
        };
        tracing::debug!(
            workers = options.worker_threads,
            manual = options.is_manual(),
            "Completion queue created"
        );
        Ok(Self {
            inner: Rc::new(QueueInner {
                host: host.clone(),
                native,
                options,
                batches: RefCell::new(HashMap::new()),
                next_ticket: Cell::new(1),
                workers: RefCell::new(workers),
                receiver: RefCell::new(receiver),
                receiving: Cell::new(false),
                closed: Cell::new(false),
            }),
        })
    }

    /// The host this queue dispatches on.
    pub fn host(&self) -> &HostContext {
        &self.inner.host
    }

    /// The native queue engines post to.
    pub fn native(&self) -> Arc<NativeQueue> {
        Arc::clone(&self.inner.native)
    }

    /// The options the queue was created with.
    pub fn options(&self) -> QueueOptions {
        self.inner.options
    }

    /// Returns `true` after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of batches waiting for completions.
    pub fn pending(&self) -> usize {
        self.inner.batches.borrow().len()
    }

    /// Registers `batch` and returns the tag the engine must post.
    ///
    /// Returns `None` when the queue is closed; the batch then fails with
    /// [`ServerError::QueueClosed`] on the next dispatch cycle and the caller
    /// must not start the native operation. A batch with no operations has
    /// nothing to wait for and completes on the next cycle as well.
    pub fn register(&self, batch: OperationBatch) -> Option<Tag> {
        if self.is_closed() {
            tracing::debug!(ops = ?batch.kinds(), "Batch registered on closed queue");
            self.inner
                .host
                .schedule(move || batch.fail(ServerError::QueueClosed));
            return None;
        }

        let ticket = self.inner.next_ticket.get();
        self.inner.next_ticket.set(ticket + 1);
        let tag = Tag::new(ticket);

        if batch.is_empty() {
            self.inner.host.schedule(move || {
                record_batch_completed(batch.complete());
            });
            return Some(tag);
        }

        tracing::trace!(%tag, ops = ?batch.kinds(), "Batch registered");
        let pending = {
            let mut batches = self.inner.batches.borrow_mut();
            batches.insert(tag, batch);
            batches.len()
        };
        set_pending_batches(pending);
        Some(tag)
    }

    /// Removes the batch for `tag` and fails it with `error` on the next
    /// dispatch cycle.
    ///
    /// Used when the engine refused to start the operation. Returns `false`
    /// if no batch was registered under `tag`.
    pub fn abandon(&self, tag: Tag, error: ServerError) -> bool {
        let removed = self.inner.batches.borrow_mut().remove(&tag);
        let Some(batch) = removed else {
            return false;
        };
        tracing::debug!(%tag, error = %error, "Batch abandoned");
        set_pending_batches(self.pending());
        self.inner.host.schedule(move || batch.fail(error));
        true
    }

    /// Blocks until the native queue reports an event or `timeout` elapses.
    ///
    /// Only meaningful in manual mode; with workers running they consume the
    /// events instead.
    pub fn next(&self, timeout: Option<Duration>) -> QueueEvent {
        self.inner.native.next(timeout)
    }

    /// Feeds one completion to the batch registered under `tag`.
    ///
    /// Runs the batch callback when this was its last outstanding operation.
    /// Returns `false` for unknown tags, which are logged and ignored.
    pub fn dispatch(&self, tag: Tag, success: bool) -> bool {
        let finished = {
            let mut batches = self.inner.batches.borrow_mut();
            let Some(batch) = batches.get_mut(&tag) else {
                tracing::warn!(%tag, success, "Completion for unknown tag ignored");
                return false;
            };
            tracing::trace!(%tag, success, remaining = batch.remaining(), "Completion dispatched");
            if batch.resolve(success) {
                batches.remove(&tag)
            } else {
                None
            }
        };
        if let Some(batch) = finished {
            set_pending_batches(self.pending());
            let outcome = batch.complete();
            tracing::debug!(%tag, outcome = outcome.as_str(), "Batch completed");
            record_batch_completed(outcome);
        }
        true
    }

    /// Dispatches every completion that is ready and runs every deferred host
    /// task, until neither is left. Never blocks.
    ///
    /// Returns the number of completions and tasks processed.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            let tasks = self.inner.host.run_pending();
            if tasks > 0 {
                processed += tasks;
                progressed = true;
            }
            while let Some((tag, success)) = self.poll_ready() {
                self.dispatch(tag, success);
                processed += 1;
                progressed = true;
            }
            if !progressed {
                return processed;
            }
        }
    }

    fn poll_ready(&self) -> Option<Completion> {
        if self.inner.options.is_manual() {
            match self.inner.native.try_next() {
                QueueEvent::Op { tag, success } => Some((tag, success)),
                QueueEvent::Timeout | QueueEvent::Shutdown => None,
            }
        } else {
            self.inner.receiver.borrow_mut().as_mut()?.try_recv().ok()
        }
    }

    /// Processes at least one unit of work, waiting for a worker to forward a
    /// completion if nothing is ready.
    ///
    /// In manual mode this never waits: it drains what is ready and yields.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::QueueClosed`] once the queue is closed.
    pub async fn turn(&self) -> ServerResult<usize> {
        if self.is_closed() {
            return Err(ServerError::QueueClosed);
        }
        let ready = self.run_until_idle();
        if ready > 0 {
            return Ok(ready);
        }
        if self.inner.options.is_manual() {
            tokio::task::yield_now().await;
            return Ok(0);
        }

        if self.inner.receiving.replace(true) {
            // Another turn is waiting on the receiver.
            tokio::task::yield_now().await;
            return Ok(0);
        }
        let _receiving = ReceivingGuard(&self.inner.receiving);
        // Borrowed per poll only, so `close` can still drain the receiver.
        let received = future::poll_fn(|cx| match self.inner.receiver.borrow_mut().as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        })
        .await;
        match received {
            Some((tag, success)) => {
                self.dispatch(tag, success);
                Ok(1 + self.run_until_idle())
            }
            None => Err(ServerError::QueueClosed),
        }
    }

    /// Turns the queue until `done` returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::QueueClosed`] if the queue closes first.
    pub async fn drive_until(&self, mut done: impl FnMut() -> bool) -> ServerResult<()> {
        loop {
            self.run_until_idle();
            if done() {
                return Ok(());
            }
            self.turn().await?;
        }
    }

    /// Turns the queue until it is closed.
    pub async fn run(&self) {
        while self.turn().await.is_ok() {}
    }

    /// Shuts the queue down.
    ///
    /// Completions the engine posted before the call are still dispatched.
    /// Every batch left after that completes with `success = false`, so its
    /// callback still runs exactly once. Later registrations fail with
    /// [`ServerError::QueueClosed`].
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.inner.native.shutdown();
        let workers = self.inner.workers.borrow_mut().take();
        if let Some(mut pool) = workers {
            pool.join();
        }
        self.run_until_idle();
        self.inner.receiver.borrow_mut().take();

        let mut leftovers: Vec<(Tag, OperationBatch)> =
            self.inner.batches.borrow_mut().drain().collect();
        leftovers.sort_by_key(|(tag, _)| *tag);
        let abandoned = leftovers.len();
        set_pending_batches(0);
        for (tag, mut batch) in leftovers {
            tracing::debug!(%tag, ops = ?batch.kinds(), "Failing batch left on closed queue");
            batch.fail_remaining();
            batch.complete();
            record_batch_completed(BatchOutcome::Abandoned);
        }
        self.inner.host.run_pending();
        tracing::info!(abandoned, "Completion queue closed");
    }
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("pending", &self.pending())
            .field("options", &self.inner.options)
            .field(
                "workers",
                &self.inner.workers.borrow().as_ref().map_or(0, WorkerPool::len),
            )
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if self.closed.get() {
            return;
        }
        self.native.shutdown();
        if let Some(mut pool) = self.workers.get_mut().take() {
            pool.join();
        }
        let dropped = self.batches.get_mut().len();
        if dropped > 0 {
            tracing::warn!(dropped, "Completion queue dropped with pending batches");
        }
    }
}

//! Accepted calls.

use std::fmt;
use std::sync::Arc;

use callbridge_core::{Deadline, Metadata};
use callbridge_engine::{CallId, NativeCall};

use crate::batch::OperationBatch;
use crate::error::{ServerError, ServerResult};
use crate::op::CloseNotifyOp;
use crate::queue::CompletionQueue;

/// Host-side wrapper around a native call.
///
/// The native handle is shared with the engine; dropping every `Call` never
/// frees the call itself, the engine does that once it ended.
#[derive(Clone)]
pub struct Call {
    native: Arc<dyn NativeCall>,
    queue: CompletionQueue,
}

impl Call {
    pub(crate) fn new(native: Arc<dyn NativeCall>, queue: CompletionQueue) -> Self {
        Self { native, queue }
    }

    /// Engine call id.
    pub fn id(&self) -> CallId {
        self.native.id()
    }

    /// Returns `true` if the call was cancelled, by the client or by a
    /// forced shutdown.
    pub fn is_cancelled(&self) -> bool {
        self.native.is_cancelled()
    }

    /// Returns `true` once the call finished or was cancelled.
    pub fn is_ended(&self) -> bool {
        self.native.is_ended()
    }

    /// Cancels the call. Does nothing if it already ended.
    pub fn cancel(&self) {
        self.native.cancel();
    }

    /// Marks the server side of the call as done.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::CallRequest`] if the call already ended.
    pub fn finish(&self) -> ServerResult<()> {
        self.native.finish().map_err(ServerError::from)
    }

    /// Calls `handler` once the call ends: `Ok(())` when it finished
    /// normally, `Err(Cancelled)` when it was cancelled.
    ///
    /// Registering on an ended call completes on the next dispatch cycle.
    pub fn on_close(&self, handler: impl FnOnce(ServerResult<()>) + 'static) {
        let batch = OperationBatch::single(CloseNotifyOp::new(self.id()), move |result| {
            handler(result.map(drop));
        });
        let Some(tag) = self.queue.register(batch) else {
            return;
        };
        if let Err(code) = self.native.notify_on_close(tag) {
            self.queue.abandon(tag, code.into());
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A call delivered to a `request_call` handler.
#[derive(Debug)]
pub struct IncomingCall {
    /// The call handle.
    pub call: Call,
    /// Method path, e.g. `/package.Service/Method`.
    pub method: String,
    /// Authority the client addressed.
    pub host: String,
    /// Client deadline. Carried as data, not enforced.
    pub deadline: Deadline,
    /// Request metadata.
    pub metadata: Metadata,
}

use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::server::ServerShared;
use super::InboundCall;
use crate::{CallErrorCode, CallId, NativeCall, NativeQueue, RawCall, Tag};

/// Lifecycle of a loopback call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Not ended yet.
    Active,
    /// The server finished the call.
    Finished,
    /// The call was cancelled by either side or by the server shutting down.
    Cancelled,
}

#[derive(Debug)]
struct CallState {
    status: CallStatus,
    close_watchers: Vec<Tag>,
}

#[derive(Debug)]
pub(crate) struct LoopbackCall {
    id: CallId,
    inbound: InboundCall,
    server: Weak<ServerShared>,
    queue: Arc<NativeQueue>,
    state: Mutex<CallState>,
}

impl LoopbackCall {
    pub(crate) fn new(
        id: CallId,
        inbound: InboundCall,
        server: Weak<ServerShared>,
        queue: Arc<NativeQueue>,
    ) -> Self {
        Self {
            id,
            inbound,
            server,
            queue,
            state: Mutex::new(CallState {
                status: CallStatus::Active,
                close_watchers: Vec::new(),
            }),
        }
    }

    pub(crate) fn to_raw(self: &Arc<Self>) -> RawCall {
        RawCall {
            call: Arc::clone(self) as Arc<dyn NativeCall>,
            method: self.inbound.method.clone(),
            host: self.inbound.host.clone(),
            deadline: self.inbound.deadline,
            metadata: self.inbound.metadata.clone(),
        }
    }

    fn status(&self) -> CallStatus {
        self.state.lock().status
    }

    /// Ends the call with `status`. Returns `false` if it had already ended.
    fn end(&self, status: CallStatus) -> bool {
        let watchers = {
            let mut state = self.state.lock();
            if state.status != CallStatus::Active {
                return false;
            }
            state.status = status;
            mem::take(&mut state.close_watchers)
        };
        let success = status == CallStatus::Finished;
        for tag in watchers {
            self.queue.post(tag, success);
        }
        if let Some(server) = self.server.upgrade() {
            server.call_ended(self.id);
        }
        true
    }
}

impl NativeCall for LoopbackCall {
    fn id(&self) -> CallId {
        self.id
    }

    fn notify_on_close(&self, tag: Tag) -> Result<(), CallErrorCode> {
        let mut state = self.state.lock();
        match state.status {
            CallStatus::Active => state.close_watchers.push(tag),
            CallStatus::Finished => {
                self.queue.post(tag, true);
            }
            CallStatus::Cancelled => {
                self.queue.post(tag, false);
            }
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), CallErrorCode> {
        if self.end(CallStatus::Finished) {
            Ok(())
        } else {
            Err(CallErrorCode::AlreadyFinished)
        }
    }

    fn cancel(&self) {
        if self.end(CallStatus::Cancelled) {
            tracing::trace!(call = %self.id, "Call cancelled");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.status() == CallStatus::Cancelled
    }

    fn is_ended(&self) -> bool {
        self.status() != CallStatus::Active
    }
}

/// Client-side view of a call sent through [`LoopbackClient`](super::LoopbackClient).
#[derive(Debug, Clone)]
pub struct ClientCall {
    call: Arc<LoopbackCall>,
}

impl ClientCall {
    pub(crate) fn new(call: Arc<LoopbackCall>) -> Self {
        Self { call }
    }

    /// The engine-assigned call id.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.call.id
    }

    /// Current status of the call.
    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.call.status()
    }

    /// Cancels the call from the client side.
    pub fn cancel(&self) {
        self.call.cancel();
    }
}

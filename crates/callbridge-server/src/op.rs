//! Operations: one typed asynchronous event each.
//!
//! | Operation | Started by | Result |
//! |-----------|------------|--------|
//! | [`NewCallOp`] | `Server::request_call` | [`IncomingCall`] |
//! | [`ShutdownNotifyOp`] | `Server::try_shutdown` / `force_shutdown` | empty |
//! | [`CloseNotifyOp`] | `Call::on_close` | empty |

use std::fmt;

use callbridge_core::{CoreError, Deadline, Metadata};
use callbridge_engine::{CallId, CallSlot, RawCall};

use crate::call::{Call, IncomingCall};
use crate::error::{ServerError, ServerResult};
use crate::queue::CompletionQueue;

/// Host-visible value built by a completed operation.
#[derive(Debug)]
pub enum OpValue {
    /// The operation carries no value.
    Empty,
    /// An accepted call.
    Call(Box<IncomingCall>),
}

impl OpValue {
    /// Returns the accepted call, if this value holds one.
    pub fn into_call(self) -> Option<IncomingCall> {
        match self {
            Self::Call(call) => Some(*call),
            Self::Empty => None,
        }
    }
}

/// One asynchronous event inside an [`OperationBatch`](crate::OperationBatch).
pub trait Operation: fmt::Debug {
    /// Short name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Consumes the native payload. `success` is the native completion flag.
    ///
    /// An error aborts the batch with [`ServerError::OperationParse`].
    fn parse(&mut self, success: bool) -> ServerResult<()>;

    /// Final operations run [`on_complete`](Self::on_complete) before the
    /// batch callback so the callback observes their side effect.
    fn is_final(&self) -> bool {
        false
    }

    /// Builds the host-visible value. Only called when the batch succeeded.
    fn build_result(&mut self) -> OpValue;

    /// Side effect once the whole batch is resolved. `success = false` means
    /// the batch failed, was cancelled, or never reached the engine.
    fn on_complete(&mut self, _success: bool) {}

    /// Returns `true` if the event was cancelled after the engine matched it
    /// but before it was delivered. Counts as `success = false`.
    fn overtaken(&self) -> bool {
        false
    }
}

/// Accepts one inbound call.
#[derive(Debug)]
pub struct NewCallOp {
    slot: CallSlot,
    queue: CompletionQueue,
    call: Option<IncomingCall>,
}

impl NewCallOp {
    /// Operation kind.
    pub const KIND: &'static str = "new_call";

    /// Creates the operation. The engine fills `slot` when it matches a call.
    pub fn new(slot: CallSlot, queue: CompletionQueue) -> Self {
        Self {
            slot,
            queue,
            call: None,
        }
    }

    fn decode(&self, raw: RawCall) -> ServerResult<IncomingCall> {
        let decoded = decode_fields(&raw);
        match decoded {
            Ok((method, host, deadline, metadata)) => Ok(IncomingCall {
                call: Call::new(raw.call, self.queue.clone()),
                method,
                host,
                deadline,
                metadata,
            }),
            Err(e) => {
                // The engine counts the call as in flight; it must end.
                raw.call.cancel();
                Err(ServerError::parse(Self::KIND, e.to_string()))
            }
        }
    }
}

fn decode_fields(raw: &RawCall) -> Result<(String, String, Deadline, Metadata), CoreError> {
    let method = std::str::from_utf8(&raw.method)
        .map_err(|_| CoreError::Utf8 { field: "method" })?
        .to_owned();
    let host = std::str::from_utf8(&raw.host)
        .map_err(|_| CoreError::Utf8 { field: "host" })?
        .to_owned();
    let deadline = Deadline::decode(&raw.deadline)?;
    let metadata = Metadata::decode(raw.metadata.iter().cloned())?;
    Ok((method, host, deadline, metadata))
}

impl Operation for NewCallOp {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parse(&mut self, success: bool) -> ServerResult<()> {
        if !success {
            return Ok(());
        }
        let raw = self
            .slot
            .take()
            .ok_or_else(|| ServerError::parse(Self::KIND, "completion carried no call"))?;
        self.call = Some(self.decode(raw)?);
        Ok(())
    }

    fn build_result(&mut self) -> OpValue {
        self.call
            .take()
            .map_or(OpValue::Empty, |call| OpValue::Call(Box::new(call)))
    }

    fn on_complete(&mut self, success: bool) {
        if success {
            callbridge_telemetry::metrics::record_call_accepted();
            return;
        }
        if let Some(undelivered) = self.call.take() {
            undelivered.call.cancel();
        }
        // Matched by the engine but never parsed; it still counts as in flight.
        if let Some(raw) = self.slot.take() {
            raw.call.cancel();
        }
    }

    fn overtaken(&self) -> bool {
        self.call
            .as_ref()
            .is_some_and(|incoming| incoming.call.is_cancelled())
    }
}

/// Waits for the engine to confirm shutdown.
///
/// Final: the confirmation hook runs before the batch callback.
pub struct ShutdownNotifyOp {
    on_confirmed: Option<Box<dyn FnOnce()>>,
}

impl ShutdownNotifyOp {
    /// Operation kind.
    pub const KIND: &'static str = "shutdown_notify";

    /// Creates the operation; `on_confirmed` runs once the engine confirmed.
    pub fn new(on_confirmed: impl FnOnce() + 'static) -> Self {
        Self {
            on_confirmed: Some(Box::new(on_confirmed)),
        }
    }
}

impl fmt::Debug for ShutdownNotifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownNotifyOp")
            .field("confirmed", &self.on_confirmed.is_none())
            .finish()
    }
}

impl Operation for ShutdownNotifyOp {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parse(&mut self, _success: bool) -> ServerResult<()> {
        Ok(())
    }

    fn is_final(&self) -> bool {
        true
    }

    fn build_result(&mut self) -> OpValue {
        OpValue::Empty
    }

    fn on_complete(&mut self, success: bool) {
        if success {
            if let Some(hook) = self.on_confirmed.take() {
                hook();
            }
        } else {
            tracing::warn!("Shutdown notification failed before confirmation");
        }
    }
}

/// Waits for a call to end.
#[derive(Debug)]
pub struct CloseNotifyOp {
    call: CallId,
}

impl CloseNotifyOp {
    /// Operation kind.
    pub const KIND: &'static str = "close_notify";

    /// Creates the operation for `call`.
    pub fn new(call: CallId) -> Self {
        Self { call }
    }
}

impl Operation for CloseNotifyOp {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn parse(&mut self, _success: bool) -> ServerResult<()> {
        Ok(())
    }

    fn build_result(&mut self) -> OpValue {
        OpValue::Empty
    }

    fn on_complete(&mut self, success: bool) {
        tracing::trace!(call = %self.call, success, "Call closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostContext;
    use crate::queue::QueueOptions;
    use bytes::Bytes;
    use callbridge_core::RawTimespec;
    use callbridge_engine::{CallErrorCode, NativeCall};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct StubCall {
        cancelled: AtomicBool,
    }

    impl NativeCall for StubCall {
        fn id(&self) -> CallId {
            CallId(7)
        }

        fn notify_on_close(&self, _tag: callbridge_engine::Tag) -> Result<(), CallErrorCode> {
            Ok(())
        }

        fn finish(&self) -> Result<(), CallErrorCode> {
            Ok(())
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        fn is_ended(&self) -> bool {
            self.is_cancelled()
        }
    }

    fn raw_call(native: &Arc<StubCall>, method: &'static [u8]) -> RawCall {
        RawCall {
            call: Arc::clone(native) as Arc<dyn NativeCall>,
            method: Bytes::from_static(method),
            host: Bytes::from_static(b"example.test"),
            deadline: RawTimespec::realtime(1_700_000_000, 250_000_000),
            metadata: vec![
                (Bytes::from_static(b"X-Trace"), Bytes::from_static(b"a")),
                (Bytes::from_static(b"x-trace"), Bytes::from_static(b"b")),
            ],
        }
    }

    fn queue() -> CompletionQueue {
        CompletionQueue::new(&HostContext::new(), QueueOptions::manual()).unwrap()
    }

    #[test]
    fn test_new_call_decodes_payload() {
        let native = Arc::new(StubCall::default());
        let slot = CallSlot::new();
        slot.fill(raw_call(&native, b"/pkg.Svc/Method"));

        let mut op = NewCallOp::new(slot, queue());
        op.parse(true).unwrap();
        assert!(!op.overtaken());

        let call = op.build_result().into_call().unwrap();
        assert_eq!(call.method, "/pkg.Svc/Method");
        assert_eq!(call.host, "example.test");
        assert_eq!(call.deadline.millis_since_epoch(), Some(1_700_000_000_250));
        assert_eq!(call.metadata.get_all("x-trace").len(), 2);
        assert_eq!(call.call.id(), CallId(7));
    }

    #[test]
    fn test_new_call_failure_skips_payload() {
        let mut op = NewCallOp::new(CallSlot::new(), queue());
        assert!(op.parse(false).is_ok());
        assert!(op.build_result().into_call().is_none());
    }

    #[test]
    fn test_new_call_empty_slot_is_parse_error() {
        let mut op = NewCallOp::new(CallSlot::new(), queue());
        let err = op.parse(true).unwrap_err();
        assert!(matches!(err, ServerError::OperationParse { op: "new_call", .. }));
    }

    #[test]
    fn test_new_call_bad_method_cancels_native_call() {
        let native = Arc::new(StubCall::default());
        let slot = CallSlot::new();
        slot.fill(raw_call(&native, b"\xff\xfe"));

        let mut op = NewCallOp::new(slot, queue());
        let err = op.parse(true).unwrap_err();
        assert!(err.to_string().contains("method"));
        assert!(native.is_cancelled());
    }

    #[test]
    fn test_new_call_overtaken_by_cancellation() {
        let native = Arc::new(StubCall::default());
        let slot = CallSlot::new();
        slot.fill(raw_call(&native, b"/pkg.Svc/Method"));

        let mut op = NewCallOp::new(slot, queue());
        op.parse(true).unwrap();
        native.cancel();
        assert!(op.overtaken());
    }

    #[test]
    fn test_undelivered_call_is_cancelled_on_failure() {
        let native = Arc::new(StubCall::default());
        let slot = CallSlot::new();
        slot.fill(raw_call(&native, b"/pkg.Svc/Method"));

        let mut op = NewCallOp::new(slot, queue());
        op.parse(true).unwrap();
        op.on_complete(false);
        assert!(native.is_cancelled());
    }

    #[test]
    fn test_unparsed_call_in_slot_is_cancelled_on_failure() {
        let native = Arc::new(StubCall::default());
        let slot = CallSlot::new();
        slot.fill(raw_call(&native, b"/pkg.Svc/Method"));

        let mut op = NewCallOp::new(slot.clone(), queue());
        op.parse(false).unwrap();
        op.on_complete(false);
        assert!(native.is_cancelled());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_shutdown_notify_runs_hook_only_on_success() {
        let ran = Rc::new(Cell::new(0));

        let counter = Rc::clone(&ran);
        let mut op = ShutdownNotifyOp::new(move || counter.set(counter.get() + 1));
        assert!(op.is_final());
        op.on_complete(false);
        assert_eq!(ran.get(), 0);

        let counter = Rc::clone(&ran);
        let mut op = ShutdownNotifyOp::new(move || counter.set(counter.get() + 1));
        op.on_complete(true);
        op.on_complete(true);
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_close_notify_is_not_final() {
        let mut op = CloseNotifyOp::new(CallId(3));
        assert!(!op.is_final());
        assert!(op.parse(false).is_ok());
        assert!(matches!(op.build_result(), OpValue::Empty));
    }
}

//! Native call handles.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use callbridge_core::{RawMetadataEntry, RawTimespec};
use parking_lot::Mutex;

use crate::error::CallErrorCode;
use crate::queue::Tag;

/// Engine-assigned call identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// A native call.
///
/// The handle is shared: the engine keeps its reference until the call ends,
/// the host keeps one for as long as it holds the call object. Neither side
/// frees the call directly.
pub trait NativeCall: Send + Sync + fmt::Debug {
    /// Returns the call identifier.
    fn id(&self) -> CallId;

    /// Posts `tag` once the call ends: `success = true` when it finished
    /// normally, `false` when it was cancelled.
    fn notify_on_close(&self, tag: Tag) -> Result<(), CallErrorCode>;

    /// Marks the server side of the call as done.
    fn finish(&self) -> Result<(), CallErrorCode>;

    /// Cancels the call. Cancelling an ended call does nothing.
    fn cancel(&self);

    /// Returns `true` if the call was cancelled.
    fn is_cancelled(&self) -> bool;

    /// Returns `true` if the call ended, either way.
    fn is_ended(&self) -> bool;
}

/// Payload the engine writes when it matches an inbound call.
#[derive(Debug, Clone)]
pub struct RawCall {
    /// Shared native call handle.
    pub call: Arc<dyn NativeCall>,
    /// Method path bytes.
    pub method: Bytes,
    /// Authority bytes.
    pub host: Bytes,
    /// Deadline timespec.
    pub deadline: RawTimespec,
    /// Metadata entries in arrival order.
    pub metadata: Vec<RawMetadataEntry>,
}

/// Output location for a pending accept request.
///
/// The host keeps one clone inside its operation, the engine another; the
/// engine fills it before posting the request's tag.
#[derive(Debug, Clone, Default)]
pub struct CallSlot(Arc<Mutex<Option<RawCall>>>);

impl CallSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the matched call, replacing any previous payload.
    pub fn fill(&self, raw: RawCall) {
        *self.0.lock() = Some(raw);
    }

    /// Takes the payload out of the slot.
    pub fn take(&self) -> Option<RawCall> {
        self.0.lock().take()
    }

    /// Returns `true` if the engine filled the slot.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }
}

//! Operation batches.
//!
//! A batch groups the operations started together under one [`Tag`] and owns
//! the single callback for all of them. Each completion for the tag resolves
//! the next unresolved operation; when the count of unresolved operations
//! reaches zero the queue calls [`OperationBatch::complete`], which consumes
//! the batch. The callback therefore cannot run twice.
//!
//! [`Tag`]: callbridge_engine::Tag

use std::fmt;

use callbridge_telemetry::BatchOutcome;

use crate::error::{ServerError, ServerResult};
use crate::op::{OpValue, Operation};

/// Callback receiving the combined result of a batch.
pub type BatchCallback = Box<dyn FnOnce(ServerResult<Vec<OpValue>>)>;

/// An ordered group of operations with one completion callback.
///
/// # Example
///
/// ```
/// use callbridge_server::{CloseNotifyOp, OperationBatch};
/// use callbridge_engine::CallId;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let fired = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&fired);
/// let mut batch = OperationBatch::single(CloseNotifyOp::new(CallId(1)), move |result| {
///     assert!(result.is_ok());
///     counter.set(counter.get() + 1);
/// });
///
/// assert!(batch.resolve(true));
/// batch.complete();
/// assert_eq!(fired.get(), 1);
/// ```
pub struct OperationBatch {
    ops: Vec<Box<dyn Operation>>,
    resolved: usize,
    all_succeeded: bool,
    parse_error: Option<ServerError>,
    callback: BatchCallback,
}

impl OperationBatch {
    /// Creates a batch from `ops`, completed through `callback`.
    pub fn new(
        ops: Vec<Box<dyn Operation>>,
        callback: impl FnOnce(ServerResult<Vec<OpValue>>) + 'static,
    ) -> Self {
        Self {
            ops,
            resolved: 0,
            all_succeeded: true,
            parse_error: None,
            callback: Box::new(callback),
        }
    }

    /// Creates a batch holding a single operation.
    pub fn single(
        op: impl Operation + 'static,
        callback: impl FnOnce(ServerResult<Vec<OpValue>>) + 'static,
    ) -> Self {
        Self::new(vec![Box::new(op)], callback)
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations still waiting for a completion.
    pub fn remaining(&self) -> usize {
        self.ops.len() - self.resolved
    }

    /// Returns `true` once every operation has seen its completion.
    pub fn is_resolved(&self) -> bool {
        self.remaining() == 0
    }

    /// Kinds of the contained operations, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.ops.iter().map(|op| op.kind()).collect()
    }

    /// Feeds one native completion to the next unresolved operation.
    ///
    /// Returns `true` when this was the last one. Completions arriving after
    /// that are ignored.
    pub fn resolve(&mut self, success: bool) -> bool {
        let Some(op) = self.ops.get_mut(self.resolved) else {
            return true;
        };
        self.resolved += 1;
        if !success {
            self.all_succeeded = false;
        }
        if let Err(e) = op.parse(success) {
            tracing::warn!(op = op.kind(), error = %e, "Completion payload rejected");
            self.parse_error.get_or_insert(e);
        }
        self.is_resolved()
    }

    /// Resolves every remaining operation with `success = false`.
    pub fn fail_remaining(&mut self) {
        while !self.resolve(false) {}
    }

    /// Runs the completion sequence and invokes the callback.
    ///
    /// The callback receives [`ServerError::OperationParse`] if any payload
    /// failed to parse, [`ServerError::Cancelled`] if any native completion
    /// reported failure or an operation was overtaken, and the built results
    /// otherwise. Final operations run their side effect before the callback,
    /// the others after it.
    pub fn complete(self) -> BatchOutcome {
        let Self {
            mut ops,
            all_succeeded,
            parse_error,
            callback,
            ..
        } = self;

        let (result, outcome) = if let Some(e) = parse_error {
            (Err(e), BatchOutcome::ParseError)
        } else if !all_succeeded || ops.iter().any(|op| op.overtaken()) {
            (Err(ServerError::Cancelled), BatchOutcome::Cancelled)
        } else {
            (Ok(()), BatchOutcome::Success)
        };
        let success = result.is_ok();

        run_side_effects(&mut ops, success, true);
        let result = result.map(|()| ops.iter_mut().map(|op| op.build_result()).collect());
        callback(result);
        run_side_effects(&mut ops, success, false);
        outcome
    }

    /// Completes the batch with `error` without waiting for completions.
    ///
    /// Used when the operation never reached the engine.
    pub fn fail(self, error: ServerError) {
        let Self {
            mut ops, callback, ..
        } = self;
        run_side_effects(&mut ops, false, true);
        callback(Err(error));
        run_side_effects(&mut ops, false, false);
    }
}

fn run_side_effects(ops: &mut [Box<dyn Operation>], success: bool, finals: bool) {
    for op in ops.iter_mut().filter(|op| op.is_final() == finals) {
        op.on_complete(success);
    }
}

impl fmt::Debug for OperationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBatch")
            .field("ops", &self.kinds())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

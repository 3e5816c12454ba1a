//! Server error types.
//!
//! Synchronous misuse is returned directly from the call that caused it.
//! Everything that goes wrong after an operation was handed to the engine is
//! delivered through that operation's callback instead.

use callbridge_core::CoreError;
use callbridge_engine::CallErrorCode;
use thiserror::Error;

/// Result type alias using [`ServerError`].
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised by the completion queue and the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Server options were malformed. No native server was created.
    #[error("invalid server configuration: {0}")]
    Configuration(#[from] CoreError),

    /// The engine could not bind the address.
    #[error("failed to bind port on {address}")]
    PortBind {
        /// The address passed to `add_port`.
        address: String,
    },

    /// The engine refused to start the operation.
    #[error("call request failed: {code}")]
    CallRequest {
        /// Engine error code.
        code: CallErrorCode,
    },

    /// A completion payload could not be decoded. Fatal to the affected batch.
    #[error("failed to parse {op} completion: {reason}")]
    OperationParse {
        /// Kind of the operation that failed.
        op: &'static str,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The native operation was cancelled or failed.
    #[error("operation cancelled")]
    Cancelled,

    /// The completion queue was closed.
    #[error("completion queue is closed")]
    QueueClosed,

    /// A completion queue worker thread could not be spawned.
    #[error("failed to spawn completion queue worker: {message}")]
    WorkerSpawn {
        /// OS error message.
        message: String,
    },
}

impl ServerError {
    /// Creates an [`OperationParse`](Self::OperationParse) error.
    pub fn parse(op: &'static str, reason: impl Into<String>) -> Self {
        Self::OperationParse {
            op,
            reason: reason.into(),
        }
    }

    /// Returns `true` for the `success = false` outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<CallErrorCode> for ServerError {
    fn from(code: CallErrorCode) -> Self {
        Self::CallRequest { code }
    }
}

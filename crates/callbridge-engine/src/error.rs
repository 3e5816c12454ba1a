//! Native engine error codes.

use thiserror::Error;

/// Reasons the engine refuses to start an operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorCode {
    /// The server is shutting down or was destroyed.
    #[error("server is shutting down")]
    ServerShutdown,

    /// No completion queue was registered with the server.
    #[error("no completion queue registered with the server")]
    NoCompletionQueue,

    /// The call already finished or was cancelled.
    #[error("call already finished")]
    AlreadyFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CallErrorCode::ServerShutdown.to_string(),
            "server is shutting down"
        );
        assert_eq!(
            CallErrorCode::AlreadyFinished.to_string(),
            "call already finished"
        );
    }
}

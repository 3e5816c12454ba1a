//! Test error types.

use std::time::Duration;

use callbridge_engine::loopback::DialError;
use callbridge_server::ServerError;
use thiserror::Error;

/// Errors that can occur while driving a test server.
#[derive(Error, Debug)]
pub enum TestError {
    /// The server rejected an operation.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// The loopback engine refused a client call.
    #[error("dial error: {0}")]
    Dial(#[from] DialError),

    /// A wait did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for test helpers.
pub type TestResult<T> = Result<T, TestError>;

//! Error types for callbridge core values.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while validating options or decoding call data.
///
/// # Example
///
/// ```
/// use callbridge_core::{ChannelArgs, CoreError};
/// use serde_json::json;
///
/// let err = ChannelArgs::from_value(&json!(["not", "a", "map"])).unwrap_err();
/// assert!(matches!(err, CoreError::Configuration { .. }));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Server options were not a mapping of string keys to integer or string values.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// A metadata entry could not be decoded.
    #[error("Metadata decode error: {message}")]
    Metadata {
        /// Human-readable error message.
        message: String,
    },

    /// A deadline timespec could not be decoded.
    #[error("Deadline decode error: {message}")]
    Deadline {
        /// Human-readable error message.
        message: String,
    },

    /// A text field of the call details was not valid UTF-8.
    #[error("Invalid UTF-8 in call {field}")]
    Utf8 {
        /// The call detail that failed to decode.
        field: &'static str,
    },
}

impl CoreError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a metadata decode error.
    #[must_use]
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Creates a deadline decode error.
    #[must_use]
    pub fn deadline(message: impl Into<String>) -> Self {
        Self::Deadline {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::configuration("bad options");
        assert_eq!(err.to_string(), "Configuration error: bad options");

        let err = CoreError::Utf8 { field: "method" };
        assert_eq!(err.to_string(), "Invalid UTF-8 in call method");
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(
            CoreError::metadata("x"),
            CoreError::Metadata { .. }
        ));
        assert!(matches!(
            CoreError::deadline("x"),
            CoreError::Deadline { .. }
        ));
    }
}

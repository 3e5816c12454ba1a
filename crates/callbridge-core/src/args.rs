//! Server options passed to the native engine at creation time.
//!
//! The engine accepts a flat mapping of string keys to 32-bit integer or
//! string values. Anything else is rejected before a native server is allocated.
//!
//! # Example
//!
//! ```
//! use callbridge_core::{ArgValue, ChannelArgs};
//! use callbridge_core::args::keys;
//!
//! let args = ChannelArgs::new()
//!     .with(keys::MAX_CONCURRENT_STREAMS, 100)
//!     .with(keys::PRIMARY_USER_AGENT, "callbridge/0.1");
//!
//! assert_eq!(args.get_int(keys::MAX_CONCURRENT_STREAMS), Some(100));
//! assert_eq!(args.get(keys::PRIMARY_USER_AGENT), Some(&ArgValue::Str("callbridge/0.1".into())));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

const SHAPE_MESSAGE: &str =
    "server options must be an object with string keys and integer or string values";

/// Well-known option keys understood by native engines.
pub mod keys {
    /// Maximum number of concurrent streams per connection.
    pub const MAX_CONCURRENT_STREAMS: &str = "grpc.max_concurrent_streams";

    /// Interval between transport keepalive pings, in milliseconds.
    pub const KEEPALIVE_TIME_MS: &str = "grpc.keepalive_time_ms";

    /// User agent prefix advertised by the server.
    pub const PRIMARY_USER_AGENT: &str = "grpc.primary_user_agent";

    /// Maximum accepted inbound message size in bytes.
    pub const MAX_RECEIVE_MESSAGE_LENGTH: &str = "grpc.max_receive_message_length";
}

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// Integer option. Native engines take C `int` values.
    Int(i32),
    /// String option.
    Str(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Validated server options.
///
/// Keys are kept sorted so the engine always receives them in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelArgs {
    entries: BTreeMap<String, ArgValue>,
}

impl ChannelArgs {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option, replacing any previous value for the key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets an option, returning the previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Option<ArgValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Validates a host-provided value and converts it into options.
    ///
    /// `null` yields an empty option set. An object is accepted when every
    /// value is a string or an integer that fits in 32 bits; floats,
    /// booleans, arrays and nested objects are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] when the value has any other shape.
    ///
    /// # Example
    ///
    /// ```
    /// use callbridge_core::ChannelArgs;
    /// use serde_json::json;
    ///
    /// let args = ChannelArgs::from_value(&json!({"grpc.max_concurrent_streams": 8})).unwrap();
    /// assert_eq!(args.len(), 1);
    ///
    /// assert!(ChannelArgs::from_value(&json!({"ratio": 0.5})).is_err());
    /// ```
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            _ => return Err(CoreError::configuration(SHAPE_MESSAGE)),
        };

        let mut args = Self::new();
        for (key, value) in object {
            let value = match value {
                Value::String(s) => ArgValue::Str(s.clone()),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .map(ArgValue::Int)
                    .ok_or_else(|| {
                        CoreError::configuration(format!(
                            "{SHAPE_MESSAGE} (option '{key}' is not a 32-bit integer)"
                        ))
                    })?,
                _ => {
                    return Err(CoreError::configuration(format!(
                        "{SHAPE_MESSAGE} (option '{key}' has an unsupported type)"
                    )))
                }
            };
            args.entries.insert(key.clone(), value);
        }
        Ok(args)
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.entries.get(key)
    }

    /// Returns the value for a key if it is an integer.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value for a key if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ArgValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns the number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

//! Test call building.

use std::time::Duration;

use bytes::Bytes;
use callbridge_core::{Deadline, Metadata, RawTimespec};
use callbridge_engine::loopback::InboundCall;
use callbridge_server::IncomingCall;
use chrono::{DateTime, TimeDelta, Utc};

/// A client call with typed fields.
///
/// Unlike [`InboundCall`], which carries raw bytes, a `TestCall` always
/// describes a well-formed call, so it can check that the server delivered
/// exactly what was sent.
///
/// # Example
///
/// ```
/// use callbridge_test::TestCall;
///
/// let call = TestCall::new("/echo.Echo/Say")
///     .host("echo.local")
///     .header("x-request-id", "42");
///
/// assert_eq!(call.method(), "/echo.Echo/Say");
/// assert_eq!(call.metadata().get("x-request-id").unwrap().as_ref(), b"42");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct TestCall {
    method: String,
    host: String,
    deadline: RawTimespec,
    metadata: Metadata,
}

impl TestCall {
    /// Creates a call for `method` addressed to `localhost` with no deadline.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            host: "localhost".to_string(),
            deadline: RawTimespec::infinite_future(),
            metadata: Metadata::new(),
        }
    }

    /// Sets the authority.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets an absolute deadline.
    pub fn deadline_at(mut self, at: DateTime<Utc>) -> Self {
        self.deadline = RawTimespec::from_datetime(at);
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn timeout(self, timeout: Duration) -> Self {
        let delta = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let at = Utc::now().checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.deadline_at(at)
    }

    /// Appends a metadata value.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid metadata key.
    pub fn header(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.metadata
            .append(name, value)
            .expect("valid metadata key");
        self
    }

    /// The method path.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The metadata that will be sent.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The deadline the server should decode.
    pub fn expected_deadline(&self) -> Deadline {
        Deadline::decode(&self.deadline).unwrap_or(Deadline::Infinite)
    }

    /// Converts into the raw engine-level call.
    pub fn into_inbound(self) -> InboundCall {
        InboundCall::new(&self.method)
            .host(&self.host)
            .deadline(self.deadline)
            .metadata(&self.metadata)
    }

    /// Asserts that `incoming` carries this call's method, host, deadline and
    /// metadata.
    ///
    /// # Panics
    ///
    /// Panics on the first field that differs.
    pub fn assert_delivered(&self, incoming: &IncomingCall) {
        assert_eq!(incoming.method, self.method, "method differs");
        assert_eq!(incoming.host, self.host, "host differs");
        assert_eq!(incoming.deadline, self.expected_deadline(), "deadline differs");
        assert_eq!(incoming.metadata, self.metadata, "metadata differs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let call = TestCall::new("/svc/M");
        assert_eq!(call.method(), "/svc/M");
        assert!(call.metadata().is_empty());
        assert!(call.expected_deadline().is_infinite());
    }

    #[test]
    fn test_timeout_sets_future_deadline() {
        let before = Utc::now();
        let call = TestCall::new("/svc/M").timeout(Duration::from_secs(30));
        let at = call.expected_deadline().as_datetime().unwrap();
        assert!(at > before);
        assert!(at <= Utc::now() + TimeDelta::seconds(31));
    }

    #[test]
    fn test_header_normalizes_key() {
        let call = TestCall::new("/svc/M").header("X-Trace", "a").header("x-trace", "b");
        assert_eq!(call.metadata().get_all("x-trace").len(), 2);
    }

    #[test]
    #[should_panic(expected = "valid metadata key")]
    fn test_header_rejects_pseudo_header() {
        let _ = TestCall::new("/svc/M").header(":authority", "x");
    }
}

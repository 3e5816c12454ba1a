//! Call deadlines.
//!
//! The engine reports deadlines as a timespec tagged with its clock. Deadlines
//! are carried to handlers as data; nothing in callbridge enforces them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// Clock a raw timespec is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockType {
    /// Wall-clock time since the Unix epoch.
    Realtime,
    /// A point that is never reached.
    InfFuture,
    /// A point that has always passed.
    InfPast,
}

/// Deadline as written by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTimespec {
    /// Whole seconds.
    pub seconds: i64,
    /// Nanosecond fraction, `0..1_000_000_000` when well formed.
    pub nanos: i32,
    /// Clock the value is expressed in.
    pub clock: ClockType,
}

impl RawTimespec {
    /// A realtime timespec.
    #[must_use]
    pub const fn realtime(seconds: i64, nanos: i32) -> Self {
        Self {
            seconds,
            nanos,
            clock: ClockType::Realtime,
        }
    }

    /// The infinite-future timespec used for calls without a deadline.
    #[must_use]
    pub const fn infinite_future() -> Self {
        Self {
            seconds: i64::MAX,
            nanos: 0,
            clock: ClockType::InfFuture,
        }
    }

    /// Converts a wall-clock instant into a realtime timespec.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        // timestamp_subsec_nanos is below 2_000_000_000 (leap seconds), fits i32
        #[allow(clippy::cast_possible_wrap)]
        let nanos = at.timestamp_subsec_nanos() as i32;
        Self::realtime(at.timestamp(), nanos)
    }
}

/// Decoded call deadline.
///
/// # Example
///
/// ```
/// use callbridge_core::{Deadline, RawTimespec};
///
/// let deadline = Deadline::decode(&RawTimespec::realtime(1_700_000_000, 500_000_000)).unwrap();
/// assert_eq!(deadline.millis_since_epoch(), Some(1_700_000_000_500));
///
/// let none = Deadline::decode(&RawTimespec::infinite_future()).unwrap();
/// assert!(none.is_infinite());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Deadline {
    /// The call has no deadline.
    Infinite,
    /// The call must complete before this instant.
    At(DateTime<Utc>),
}

impl Deadline {
    /// Decodes an engine timespec.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Deadline`] when the nanosecond field is out of
    /// range or the instant cannot be represented.
    pub fn decode(raw: &RawTimespec) -> CoreResult<Self> {
        match raw.clock {
            ClockType::InfFuture => Ok(Self::Infinite),
            ClockType::InfPast => Ok(Self::At(DateTime::<Utc>::MIN_UTC)),
            ClockType::Realtime => {
                if !(0..NANOS_PER_SECOND).contains(&raw.nanos) {
                    return Err(CoreError::deadline(format!(
                        "nanosecond field {} out of range",
                        raw.nanos
                    )));
                }
                #[allow(clippy::cast_sign_loss)]
                let nanos = raw.nanos as u32;
                DateTime::from_timestamp(raw.seconds, nanos)
                    .map(Self::At)
                    .ok_or_else(|| {
                        CoreError::deadline(format!("{}s is not a representable instant", raw.seconds))
                    })
            }
        }
    }

    /// Returns `true` if the call has no deadline.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    /// Returns the deadline instant, if any.
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Infinite => None,
            Self::At(at) => Some(*at),
        }
    }

    /// Milliseconds since the Unix epoch, `None` when infinite.
    #[must_use]
    pub fn millis_since_epoch(&self) -> Option<i64> {
        self.as_datetime().map(|at| at.timestamp_millis())
    }

    /// Time left before the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.as_datetime()
            .map(|at| (at - now).max(TimeDelta::zero()))
    }

    /// Returns `true` if the deadline has passed at `now`.
    #[must_use]
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.as_datetime().is_some_and(|at| at <= now)
    }
}

impl From<DateTime<Utc>> for Deadline {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

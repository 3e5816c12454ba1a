//! # Callbridge Core
//!
//! Foundational types shared by every callbridge crate:
//!
//! - [`ChannelArgs`] - Validated server options (string keys, integer or string values)
//! - [`Metadata`] - Case-insensitive, order-preserving call metadata
//! - [`Deadline`] - Call deadline decoded from the engine's timespec
//! - [`CoreError`] - Errors raised while validating or decoding the above

#![doc(html_root_url = "https://docs.rs/callbridge-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod args;
mod deadline;
mod error;
mod metadata;

pub use args::{ArgValue, ChannelArgs};
pub use deadline::{ClockType, Deadline, RawTimespec};
pub use error::{CoreError, CoreResult};
pub use metadata::{Metadata, RawMetadataEntry};

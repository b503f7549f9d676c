//! # RTM Wire Codec
//!
//! JSON frames exchanged with the Slack Real Time Messaging API.

pub mod error;
pub mod frame;
pub mod timestamp;

pub use error::DecodeError;
pub use frame::{decode, Decoded, InboundEvent, MessageEvent, OutboundFrame, Reply};
pub use timestamp::{SlackTimestamp, TimestampError};

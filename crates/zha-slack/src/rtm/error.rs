//! RTM decode errors.

use thiserror::Error;

use super::frame::Reply;

/// Errors decoding an inbound RTM frame.
///
/// All are recoverable: the frame is logged and skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// Not a JSON object, or a field had the wrong shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Typeless frame without an `ok` flag.
    #[error("reply payload is missing the ok field")]
    MissingOk,

    /// The `type` discriminator is not one this client understands.
    #[error("unknown event type {0:?}")]
    UnknownType(String),

    /// The peer reported failure of a previously sent frame.
    #[error("previous message failed (reply_to {}): {}", .0.reply_to, .0.text)]
    ReplyStatus(Reply),
}

impl DecodeError {
    /// Whether the error describes the payload itself rather than a reply.
    #[must_use]
    pub fn is_payload_error(&self) -> bool {
        !matches!(self, Self::ReplyStatus(_))
    }
}

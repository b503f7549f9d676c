//! RTM frames and the inbound decoder.
//!
//! Every frame is a JSON object. Inbound frames carry a `type`
//! discriminator, except reply acknowledgements, which carry `ok` and
//! `reply_to` instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DecodeError;
use super::timestamp::SlackTimestamp;

/// `type` of the connection greeting.
pub const HELLO: &str = "hello";
/// `type` of a chat message.
pub const MESSAGE: &str = "message";
/// `type` sent before the team moves to another server.
pub const TEAM_MIGRATION_STARTED: &str = "team_migration_started";
/// `type` of a liveness ping.
pub const PING: &str = "ping";
/// `type` of a ping answer.
pub const PONG: &str = "pong";

/// A chat message posted in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: Option<SlackTimestamp>,
}

/// Inbound event with a recognized discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Connection accepted.
    Hello,
    /// Chat message.
    Message(MessageEvent),
    /// The session is about to be moved; the client should reconnect.
    TeamMigrationStarted,
    /// Answer to a ping.
    Pong {
        /// Id of the ping being answered.
        reply_to: u64,
    },
}

/// Acknowledgement of a frame this client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ok: bool,
    pub reply_to: u64,
    pub ts: Option<SlackTimestamp>,
    pub text: String,
}

/// Successful decode result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A structured event.
    Event(InboundEvent),
    /// A successful acknowledgement. Produces no event.
    Ack(Reply),
}

#[derive(Deserialize)]
struct RawReply {
    ok: Option<bool>,
    #[serde(default)]
    reply_to: u64,
    #[serde(default)]
    ts: Option<SlackTimestamp>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct RawPong {
    #[serde(default)]
    reply_to: u64,
}

/// Decode one inbound frame.
///
/// # Errors
///
/// - `DecodeError::Malformed` - not a JSON object, or a field has the wrong shape
/// - `DecodeError::UnknownType` - unrecognized `type`
/// - `DecodeError::MissingOk` - typeless frame without `ok`
/// - `DecodeError::ReplyStatus` - typeless frame with `ok: false`
pub fn decode(payload: &str) -> Result<Decoded, DecodeError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed(format!(
            "expected a JSON object, got {payload}"
        )));
    }

    let kind = match value.get("type") {
        None => return decode_reply(value),
        Some(Value::String(kind)) if kind.is_empty() => return decode_reply(value),
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(DecodeError::Malformed(format!(
                "type must be a string, got {other}"
            )))
        }
    };

    let event = match kind.as_str() {
        HELLO => InboundEvent::Hello,
        MESSAGE => InboundEvent::Message(from_value(value)?),
        TEAM_MIGRATION_STARTED => InboundEvent::TeamMigrationStarted,
        PONG => {
            let pong: RawPong = from_value(value)?;
            InboundEvent::Pong {
                reply_to: pong.reply_to,
            }
        }
        _ => return Err(DecodeError::UnknownType(kind)),
    };

    Ok(Decoded::Event(event))
}

fn decode_reply(value: Value) -> Result<Decoded, DecodeError> {
    let raw: RawReply = from_value(value)?;
    let ok = raw.ok.ok_or(DecodeError::MissingOk)?;
    let reply = Reply {
        ok,
        reply_to: raw.reply_to,
        ts: raw.ts,
        text: raw.text,
    };

    if ok {
        Ok(Decoded::Ack(reply))
    } else {
        Err(DecodeError::ReplyStatus(reply))
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Frame written by this client. `id` is unique and increasing per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Text message to a channel.
    Message {
        id: u64,
        channel: String,
        text: String,
    },
    /// Liveness ping.
    Ping { id: u64 },
}

impl OutboundFrame {
    /// Frame id.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Message { id, .. } | Self::Ping { id } => *id,
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

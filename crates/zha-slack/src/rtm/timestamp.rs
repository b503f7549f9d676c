//! Slack message timestamps (`"1355517523.000005"`).
//!
//! Only the whole seconds are interpreted; the raw text is kept so the
//! value serializes back unchanged (Slack uses it as a message id).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors parsing a [`SlackTimestamp`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Seconds part is not an integer.
    #[error("invalid timestamp {0:?}")]
    Invalid(String),

    /// Seconds do not fit a calendar date.
    #[error("timestamp {0:?} out of range")]
    OutOfRange(String),
}

/// Timestamp as sent by Slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackTimestamp {
    time: DateTime<Utc>,
    raw: String,
}

impl SlackTimestamp {
    /// Time truncated to whole seconds.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// The text this timestamp was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SlackTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let seconds = s.split('.').next().unwrap_or_default();
        let seconds: i64 = seconds
            .parse()
            .map_err(|_| TimestampError::Invalid(s.to_string()))?;
        let time = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| TimestampError::OutOfRange(s.to_string()))?;

        Ok(Self {
            time,
            raw: s.to_string(),
        })
    }
}

impl fmt::Display for SlackTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for SlackTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SlackTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

//! Messages handed to response handlers.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zha_memory::Memory;

use crate::adapter::Adapter;
use crate::error::BotError;

/// Shared slot holding the bot's adapter. Handlers reply through it, so it
/// can be filled after they are registered.
#[derive(Clone, Default)]
pub struct Outbox {
    adapter: Arc<RwLock<Option<Arc<dyn Adapter>>>>,
}

impl Outbox {
    /// Install or replace the adapter.
    pub fn set(&self, adapter: Arc<dyn Adapter>) {
        *self.adapter.write() = Some(adapter);
    }

    /// The current adapter, if any.
    #[must_use]
    pub fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.adapter.read().clone()
    }

    /// Send `text` to `channel_id` through the current adapter.
    ///
    /// # Errors
    ///
    /// - `BotError::NoAdapter` - no adapter is set
    /// - `BotError::Adapter` - the adapter refused the message
    pub async fn send(&self, text: &str, channel_id: &str) -> Result<(), BotError> {
        let adapter = self.adapter().ok_or(BotError::NoAdapter)?;
        debug!(channel_id, "Sending reply");
        adapter.send(text, channel_id).await?;
        Ok(())
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("has_adapter", &self.adapter.read().is_some())
            .finish()
    }
}

/// A received message that matched a response pattern.
#[derive(Clone)]
pub struct Message {
    /// Full message text.
    pub text: String,
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Capture groups of the pattern, in order. Unmatched groups are empty.
    pub matches: Vec<String>,
    token: CancellationToken,
    outbox: Outbox,
    memory: Arc<dyn Memory>,
}

impl Message {
    pub(crate) fn new(
        text: String,
        channel_id: String,
        matches: Vec<String>,
        token: CancellationToken,
        outbox: Outbox,
        memory: Arc<dyn Memory>,
    ) -> Self {
        Self {
            text,
            channel_id,
            matches,
            token,
            outbox,
            memory,
        }
    }

    /// Reply in the channel the message came from.
    ///
    /// # Errors
    ///
    /// - `BotError::NoAdapter` - the bot has no adapter
    /// - `BotError::Adapter` - the adapter refused the message
    pub async fn respond(&self, text: impl AsRef<str>) -> Result<(), BotError> {
        self.outbox.send(text.as_ref(), &self.channel_id).await
    }

    /// Capture group `index`, counting from zero.
    #[must_use]
    pub fn matched(&self, index: usize) -> Option<&str> {
        self.matches.get(index).map(String::as_str)
    }

    /// The bot's memory.
    #[must_use]
    pub fn memory(&self) -> &dyn Memory {
        self.memory.as_ref()
    }

    /// Cancelled when the handler times out or the bot shuts down.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("text", &self.text)
            .field("channel_id", &self.channel_id)
            .field("matches", &self.matches)
            .finish_non_exhaustive()
    }
}

//! The live session and the slot that guards it.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::rtm::OutboundFrame;
use crate::transport::{FrameSink, TransportError};

/// Write half of one connection plus its frame id counter.
pub(crate) struct Session {
    id: u64,
    sink: Box<dyn FrameSink>,
    next_frame_id: u64,
}

impl Session {
    pub(crate) fn new(id: u64, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id,
            sink,
            next_frame_id: 1,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn next_frame_id(&mut self) -> u64 {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        id
    }

    /// Write a text message. Returns the frame id used.
    pub(crate) async fn write_message(
        &mut self,
        channel: &str,
        text: &str,
    ) -> Result<u64, TransportError> {
        let id = self.next_frame_id();
        self.write(OutboundFrame::Message {
            id,
            channel: channel.to_string(),
            text: text.to_string(),
        })
        .await?;
        Ok(id)
    }

    /// Write a liveness ping. Returns the frame id used.
    pub(crate) async fn ping(&mut self) -> Result<u64, TransportError> {
        let id = self.next_frame_id();
        self.write(OutboundFrame::Ping { id }).await?;
        Ok(id)
    }

    async fn write(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let text = frame.encode()?;
        self.sink.send_frame(text).await
    }

    pub(crate) async fn close(mut self) -> Result<(), TransportError> {
        self.sink.close().await
    }
}

/// Holds the live session, if any.
///
/// Only the control task replaces the content. Every write holds the lock
/// for its whole duration.
#[derive(Clone, Default)]
pub(crate) struct SessionSlot(Arc<Mutex<Option<Session>>>);

impl SessionSlot {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.0.lock().await
    }
}

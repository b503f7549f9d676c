//! Outbound drain: writes queued messages to the live session, in order.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::session::SessionSlot;
use super::OutboundMessage;

pub(crate) async fn drain(
    mut queue: mpsc::Receiver<OutboundMessage>,
    session: SessionSlot,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => None,
            message = queue.recv() => message,
        };
        let Some(message) = next else {
            break;
        };

        let mut slot = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            slot = session.lock() => slot,
        };
        let Some(live) = slot.as_mut() else {
            warn!(channel_id = %message.channel_id, "No live session, outbound message dropped");
            continue;
        };

        let session_id = live.id();
        // A peer that stops reading must not hold up stop.
        let written = tokio::select! {
            biased;
            () = stop.cancelled() => {
                warn!(session_id, channel_id = %message.channel_id, "Stopped during write, outbound message dropped");
                break;
            }
            written = live.write_message(&message.channel_id, &message.text) => written,
        };

        match written {
            Ok(frame_id) => debug!(
                session_id,
                frame_id,
                channel_id = %message.channel_id,
                "Message sent"
            ),
            // Not retried.
            Err(e) => error!(
                session_id,
                channel_id = %message.channel_id,
                error = %e,
                "Failed to send message"
            ),
        }
    }

    debug!("Outbound drain stopped");
}

//! Inbound ingestion for one session.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zha_bus::{Emitter, ReceiveMessageEvent};

use super::control::ControlRequest;
use crate::rtm::{self, DecodeError, Decoded, InboundEvent};
use crate::transport::{FrameSource, TransportError};

/// Read frames until end of stream or cancellation.
///
/// End of stream is reported to the control task once, then the loop exits;
/// the control task decides whether the session is replaced.
pub(crate) async fn read_loop(
    session_id: u64,
    mut source: Box<dyn FrameSource>,
    emitter: Emitter,
    requests: mpsc::UnboundedSender<ControlRequest>,
    token: CancellationToken,
) {
    debug!(session_id, "Receiving events");

    loop {
        let step = tokio::select! {
            biased;
            () = token.cancelled() => None,
            frame = source.next_frame() => Some(frame),
        };
        let Some(frame) = step else {
            debug!(session_id, "Stop receiving events");
            return;
        };

        match frame {
            Ok(payload) => {
                if let Some(request) = ingest(session_id, &payload, &emitter, &token).await {
                    let _ = requests.send(request);
                }
            }
            Err(TransportError::EndOfStream) => {
                warn!(session_id, "Peer closed the stream");
                let _ = requests.send(ControlRequest::ReadClosed {
                    session: session_id,
                });
                return;
            }
            Err(e) => error!(session_id, error = %e, "Error on receiving payload"),
        }
    }
}

async fn ingest(
    session_id: u64,
    payload: &str,
    emitter: &Emitter,
    token: &CancellationToken,
) -> Option<ControlRequest> {
    match rtm::decode(payload) {
        Ok(Decoded::Event(InboundEvent::Message(message))) => {
            debug!(session_id, channel_id = %message.channel, user = %message.user, "Received message");
            let channel_id = message.channel.clone();
            // The dispatcher queue may be full; a replaced session must not
            // deliver anything once its reader is cancelled.
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    warn!(session_id, channel_id = %channel_id, "Session closed before delivery, message dropped");
                }
                () = emitter.emit(ReceiveMessageEvent::new(message.text, message.channel)) => {}
            }
            None
        }
        Ok(Decoded::Event(InboundEvent::Hello)) => {
            info!(session_id, "Session greeted");
            None
        }
        Ok(Decoded::Event(InboundEvent::TeamMigrationStarted)) => {
            info!(session_id, "Team migration started");
            Some(ControlRequest::Reconnect {
                session: session_id,
            })
        }
        Ok(Decoded::Event(InboundEvent::Pong { reply_to })) => {
            debug!(session_id, reply_to, "Received pong");
            None
        }
        Ok(Decoded::Ack(reply)) => {
            debug!(session_id, reply_to = reply.reply_to, "Message acknowledged");
            None
        }
        Err(DecodeError::ReplyStatus(reply)) => {
            error!(
                session_id,
                reply_to = reply.reply_to,
                text = %reply.text,
                "Previously posted message failed"
            );
            None
        }
        Err(e) => {
            warn!(session_id, error = %e, payload, "Skipping undecodable payload");
            None
        }
    }
}

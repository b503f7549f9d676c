//! WebSocket transport for the Slack RTM API.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{Connection, Connector, FrameSink, FrameSource, TransportError};
use crate::webapi::WebApiClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolves the endpoint with `rtm.start` and connects over WebSocket.
#[derive(Debug, Clone)]
pub struct SlackConnector {
    client: WebApiClient,
}

impl SlackConnector {
    /// Create a connector using the given Web API client.
    #[must_use]
    pub fn new(client: WebApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for SlackConnector {
    async fn fetch_endpoint(&self) -> Result<String, TransportError> {
        let start = self.client.rtm_start().await?;
        Ok(start.into_url()?)
    }

    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        info!("Connecting to RTM WebSocket");
        let (stream, _response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (sink, source) = stream.split();
        Ok(Connection {
            sink: Box::new(WsSink { sink }),
            source: Box::new(WsSource { source }),
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::text(frame))
            .await
            .map_err(map_error(TransportError::Send))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Result<String, TransportError> {
        loop {
            let message = match self.source.next().await {
                None => return Err(TransportError::EndOfStream),
                Some(message) => message.map_err(map_error(TransportError::Receive))?,
            };

            match message {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Close(_) => return Err(TransportError::EndOfStream),
                // Control frames are answered by tungstenite itself.
                other => debug!(len = other.len(), "Skipping non-text frame"),
            }
        }
    }
}

fn map_error(
    otherwise: fn(String) -> TransportError,
) -> impl Fn(tungstenite::Error) -> TransportError {
    move |e| match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::EndOfStream
        }
        e => otherwise(e.to_string()),
    }
}

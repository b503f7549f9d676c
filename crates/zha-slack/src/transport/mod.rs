//! # Transport
//!
//! The external connection collaborator behind a supervisor session.
//!
//! A [`Connector`] resolves an endpoint and opens a [`Connection`], which
//! is split into a write half ([`FrameSink`]) and a read half
//! ([`FrameSource`]) so the supervisor can hand each to a different task.

use async_trait::async_trait;
use thiserror::Error;

use crate::webapi::WebApiError;

pub mod memory;
pub mod websocket;

pub use memory::{memory_transport, MemoryConnector, MemoryPeer, MemoryServer};
pub use websocket::SlackConnector;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed its side of the stream.
    #[error("end of stream")]
    EndOfStream,

    /// The local side was already closed.
    #[error("connection closed")]
    Closed,

    /// Resolving the endpoint failed.
    #[error("endpoint lookup failed: {0}")]
    Endpoint(#[from] WebApiError),

    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    Receive(String),

    /// A frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the read side reached end of stream.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next text frame.
    ///
    /// Returns `TransportError::EndOfStream` once the peer has closed.
    async fn next_frame(&mut self) -> Result<String, TransportError>;
}

/// An open connection, split into its halves.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens sessions against the messaging service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolve the endpoint to connect to.
    async fn fetch_endpoint(&self) -> Result<String, TransportError>;

    /// Open a connection to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError>;
}

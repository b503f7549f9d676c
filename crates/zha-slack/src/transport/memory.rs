//! In-memory transport.
//!
//! A [`MemoryConnector`] hands every accepted connection to the paired
//! [`MemoryServer`] as a [`MemoryPeer`], which plays the remote side:
//! it pushes inbound frames, reads what the client wrote, hangs up,
//! refuses writes or stops reading altogether. Endpoint lookups can be made to fail on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connection, Connector, FrameSink, FrameSource, TransportError};

/// Endpoint reported by [`MemoryConnector::fetch_endpoint`].
pub const MEMORY_ENDPOINT: &str = "memory://rtm";

#[derive(Debug, Default)]
struct Behaviour {
    lookups: u32,
    fail_next: u32,
    fail_always: bool,
}

struct Shared {
    behaviour: Mutex<Behaviour>,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Create a connected connector/server pair.
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (accepted, peers) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        behaviour: Mutex::new(Behaviour::default()),
        accepted,
    });
    (
        MemoryConnector {
            shared: shared.clone(),
        },
        MemoryServer { shared, peers },
    )
}

/// Client side of the in-memory transport.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn fetch_endpoint(&self) -> Result<String, TransportError> {
        let mut behaviour = self.shared.behaviour.lock();
        behaviour.lookups += 1;
        let attempt = behaviour.lookups;

        if behaviour.fail_always {
            return Err(TransportError::Connect(format!(
                "endpoint unavailable (attempt {attempt})"
            )));
        }
        if behaviour.fail_next > 0 {
            behaviour.fail_next -= 1;
            return Err(TransportError::Connect(format!(
                "endpoint unavailable (attempt {attempt})"
            )));
        }
        Ok(MEMORY_ENDPOINT.to_string())
    }

    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        if endpoint != MEMORY_ENDPOINT {
            return Err(TransportError::Connect(format!("unknown endpoint {endpoint}")));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let refuse_writes = Arc::new(AtomicBool::new(false));
        let stall_writes = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            refuse_writes: refuse_writes.clone(),
            stall_writes: stall_writes.clone(),
            closed: closed.clone(),
        };
        self.shared
            .accepted
            .send(peer)
            .map_err(|_| TransportError::Connect("server dropped".to_string()))?;

        Ok(Connection {
            sink: Box::new(MemorySink {
                outbound: outbound_tx,
                refuse_writes,
                stall_writes,
                closed,
            }),
            source: Box::new(MemorySource { inbound: inbound_rx }),
        })
    }
}

/// Server side of the in-memory transport.
pub struct MemoryServer {
    shared: Arc<Shared>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Make every endpoint lookup fail.
    pub fn fail_always(&self) {
        self.shared.behaviour.lock().fail_always = true;
    }

    /// Make the next `count` endpoint lookups fail.
    pub fn fail_next(&self, count: u32) {
        self.shared.behaviour.lock().fail_next = count;
    }

    /// Endpoint lookups seen so far.
    #[must_use]
    pub fn lookups(&self) -> u32 {
        self.shared.behaviour.lock().lookups
    }
}

/// Remote end of one accepted connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
    refuse_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Deliver a frame to the client. Returns `false` once the client's
    /// read half is gone or the peer has hung up.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|inbound| inbound.send(frame.into()).is_ok())
    }

    /// Next frame written by the client, or `None` once its write half is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Close the peer's sending side; the client reads end of stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every further client write fail.
    pub fn refuse_writes(&self) {
        self.refuse_writes.store(true, Ordering::SeqCst);
    }

    /// Stop reading: every further client write waits forever.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Whether the client closed its write half.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemorySink {
    outbound: mpsc::UnboundedSender<String>,
    refuse_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Send("peer refused write".to_string()));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Send("peer gone".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<String, TransportError> {
        self.inbound.recv().await.ok_or(TransportError::EndOfStream)
    }
}

//! # Connection Supervisor
//!
//! Owns the single long-lived RTM session, replaces it when it fails, and
//! moves messages between it and the dispatcher.
//!
//! ## State Machine
//!
//! ```text
//!                    start / health-check failure
//!   ┌──────────────┐ ────────────────────────────► ┌──────────────┐
//!   │ Disconnected │                               │  Connecting  │◄──┐
//!   └──────────────┘                               └──────────────┘   │
//!                                          success │      │ retries    │ ping failed /
//!                                                  ▼      │ exhausted  │ end of stream /
//!                                          ┌──────────────┐│           │ team migration
//!                                          │  Connected   ├┼───────────┘
//!                                          └──────────────┘│
//!                                                          ▼
//!                        stop (from any state) ──► ┌──────────────┐
//!                                                  │   Stopped    │ (terminal)
//!                                                  └──────────────┘
//! ```
//!
//! ## Tasks
//!
//! - **control**: sole owner of the state and of session replacement
//! - **outbound drain**: writes queued messages to the live session
//! - **inbound ingestion**: one reader per session, emitting
//!   [`ReceiveMessageEvent`](zha_bus::ReceiveMessageEvent)s
//!
//! The write half of the session sits in a mutex held for the full
//! duration of each write; the read half belongs to its reader task.
//! Requests raised by a reader carry its session id, so a request from a
//! session that has already been replaced is ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument, Span};
use zha_bus::Emitter;

use crate::retry::{RetryError, RetryPolicy};
use crate::transport::{Connector, TransportError};

mod control;
mod inbound;
mod outbound;
mod session;

use control::{Control, ControlRequest};
use session::SessionSlot;

/// Default capacity of the outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 100;

/// Default period of the liveness ping.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, none being established.
    Disconnected,
    /// Establishing a session.
    Connecting,
    /// Exactly one session is live.
    Connected,
    /// Terminal.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Capacity of the outbound queue; `send` waits when it is full.
    pub outbound_capacity: usize,
    /// Period of the liveness ping. `Duration::ZERO` disables it.
    pub health_check_interval: Duration,
    /// Policy for each fetch-then-connect cycle.
    pub retry: RetryPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// A text message waiting for the outbound drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub text: String,
}

/// Errors surfaced by the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Every connection attempt failed; the supervisor has stopped.
    #[error("could not connect after {} attempts:\n{0}", .0.failures().len())]
    RetriesExhausted(#[from] RetryError<TransportError>),

    /// The supervisor is no longer running.
    #[error("supervisor stopped")]
    Stopped,
}

/// Owns a [`Connector`] until spawned.
pub struct ConnectionSupervisor<C> {
    connector: C,
    emitter: Emitter,
    config: SupervisorConfig,
    span: Span,
}

impl<C: Connector> ConnectionSupervisor<C> {
    /// Create a supervisor that emits inbound messages through `emitter`.
    pub fn new(connector: C, emitter: Emitter) -> Self {
        Self {
            connector,
            emitter,
            config: SupervisorConfig::default(),
            span: info_span!("supervisor"),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the span the supervisor tasks log under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Spawn the control and outbound tasks. Nothing connects until
    /// [`SupervisorHandle::start`] is called.
    ///
    /// The join handle resolves when the supervisor stops; it carries
    /// `SupervisorError::RetriesExhausted` if it stopped because no session
    /// could be established.
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<Result<(), SupervisorError>>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let stop = CancellationToken::new();
        let ever_connected = Arc::new(AtomicBool::new(false));
        let session = SessionSlot::default();

        tokio::spawn(
            outbound::drain(outbound_rx, session.clone(), stop.clone())
                .instrument(self.span.clone()),
        );

        let control = Control {
            connector: Arc::new(self.connector),
            retry: self.config.retry,
            health_check_interval: self.config.health_check_interval,
            session,
            state: state_tx,
            requests: requests_tx.clone(),
            emitter: self.emitter,
            stop: stop.clone(),
            ever_connected: ever_connected.clone(),
            last_session_id: 0,
            current: None,
            reader: None,
        };
        let join = tokio::spawn(control.run(requests_rx).instrument(self.span));

        let handle = SupervisorHandle {
            requests: requests_tx,
            outbound: outbound_tx,
            state: state_rx,
            stop,
            ever_connected,
        };
        (handle, join)
    }
}

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    requests: mpsc::UnboundedSender<ControlRequest>,
    outbound: mpsc::Sender<OutboundMessage>,
    state: watch::Receiver<ConnectionState>,
    stop: CancellationToken,
    ever_connected: Arc<AtomicBool>,
}

impl SupervisorHandle {
    /// Ask the control loop to (re)connect.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Stopped` - the supervisor has stopped
    pub fn start(&self) -> Result<(), SupervisorError> {
        self.request(ControlRequest::Start)
    }

    /// Ping the live session now instead of waiting for the timer.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Stopped` - the supervisor has stopped
    pub fn check_connection(&self) -> Result<(), SupervisorError> {
        self.request(ControlRequest::HealthCheck)
    }

    fn request(&self, request: ControlRequest) -> Result<(), SupervisorError> {
        if self.stop.is_cancelled() {
            return Err(SupervisorError::Stopped);
        }
        self.requests
            .send(request)
            .map_err(|_| SupervisorError::Stopped)
    }

    /// Stop the supervisor: close the session and end all its tasks.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Queue a text message for `channel_id`.
    ///
    /// Before any session has ever been established this is a logged no-op.
    /// Afterwards the message is queued; it is dropped if no session is live
    /// when the drain reaches it, or if the write fails.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Stopped` - the supervisor has stopped
    pub async fn send(
        &self,
        text: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Result<(), SupervisorError> {
        let message = OutboundMessage {
            channel_id: channel_id.into(),
            text: text.into(),
        };

        if self.stop.is_cancelled() {
            return Err(SupervisorError::Stopped);
        }
        if !self.ever_connected.load(Ordering::Acquire) {
            info!(channel_id = %message.channel_id, "No session established yet, message dropped");
            return Ok(());
        }

        self.outbound
            .send(message)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the state equals `target`.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Stopped` - the supervisor stopped first
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SupervisorError> {
        let mut state = self.state.clone();
        state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SupervisorError::Stopped)
    }

    /// Resolve once the supervisor has stopped, for whatever reason.
    pub async fn stopped(&self) {
        let _ = self.wait_for_state(ConnectionState::Stopped).await;
    }
}

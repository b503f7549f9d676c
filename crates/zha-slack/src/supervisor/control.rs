//! Control loop: the only writer of the connection state and the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use zha_bus::Emitter;

use super::inbound;
use super::session::{Session, SessionSlot};
use super::{ConnectionState, SupervisorError};
use crate::retry::RetryPolicy;
use crate::transport::{Connection, Connector};

/// Upper bound on closing the session when the supervisor stops.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Requests serialized through the control loop.
///
/// Session-scoped requests carry the id of the session that raised them and
/// are ignored once that session has been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    /// (Re)connect.
    Start,
    /// Ping the live session now.
    HealthCheck,
    /// The read side of `session` reached end of stream.
    ReadClosed { session: u64 },
    /// The peer asked `session` to move elsewhere.
    Reconnect { session: u64 },
}

pub(crate) struct Control<C> {
    pub(crate) connector: Arc<C>,
    pub(crate) retry: RetryPolicy,
    pub(crate) health_check_interval: Duration,
    pub(crate) session: SessionSlot,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) requests: mpsc::UnboundedSender<ControlRequest>,
    pub(crate) emitter: Emitter,
    pub(crate) stop: CancellationToken,
    pub(crate) ever_connected: Arc<AtomicBool>,
    pub(crate) last_session_id: u64,
    pub(crate) current: Option<u64>,
    pub(crate) reader: Option<CancellationToken>,
}

impl<C: Connector> Control<C> {
    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<ControlRequest>,
    ) -> Result<(), SupervisorError> {
        let mut ticker = health_ticker(self.health_check_interval);
        info!("Supervisor started");

        let result = loop {
            let request = tokio::select! {
                biased;
                () = self.stop.cancelled() => break Ok(()),
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break Ok(()),
                },
                () = tick(&mut ticker) => ControlRequest::HealthCheck,
            };

            // Pings and connects may wait on a stalled peer; stop wins.
            let stop = self.stop.clone();
            let handled = tokio::select! {
                biased;
                () = stop.cancelled() => break Ok(()),
                handled = self.handle(request) => handled,
            };
            if let Err(e) = handled {
                break Err(e);
            }
        };

        self.shutdown().await;
        result
    }

    async fn handle(&mut self, request: ControlRequest) -> Result<(), SupervisorError> {
        match request {
            ControlRequest::Start => {
                debug!("Start requested");
                self.reconnect().await
            }
            ControlRequest::HealthCheck => self.check_connection().await,
            ControlRequest::ReadClosed { session } if self.is_current(session) => {
                // Without a reader the session is useless even if the ping succeeds.
                if self.ping_session().await {
                    info!(session_id = session, "Read side closed, replacing session");
                }
                self.reconnect().await
            }
            ControlRequest::Reconnect { session } if self.is_current(session) => {
                info!(session_id = session, "Reconnecting on request of the peer");
                self.reconnect().await
            }
            ControlRequest::ReadClosed { session } | ControlRequest::Reconnect { session } => {
                debug!(session_id = session, "Ignoring request for a replaced session");
                Ok(())
            }
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.current == Some(session)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    async fn check_connection(&mut self) -> Result<(), SupervisorError> {
        if self.current.is_none() {
            return Ok(());
        }
        if self.ping_session().await {
            return Ok(());
        }
        self.reconnect().await
    }

    /// Write a ping to the live session. `false` if there is none or the write fails.
    async fn ping_session(&self) -> bool {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            return false;
        };

        debug!(session_id = session.id(), "Checking connection status with ping");
        match session.ping().await {
            Ok(frame_id) => {
                debug!(session_id = session.id(), frame_id, "Ping sent");
                true
            }
            Err(e) => {
                error!(session_id = session.id(), error = %e, "Failed sending ping");
                false
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), SupervisorError> {
        self.set_state(ConnectionState::Connecting);
        self.disconnect().await;

        let connector = self.connector.clone();
        let attempt = self.retry.attempt(|| {
            let connector = connector.clone();
            async move {
                let endpoint = connector.fetch_endpoint().await?;
                connector.connect(&endpoint).await
            }
        });

        let outcome = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Ok(()),
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(connection) => {
                self.install(connection).await;
                Ok(())
            }
            Err(e) => {
                error!(
                    attempts = e.failures().len(),
                    error = %e,
                    "Could not connect, giving up"
                );
                Err(SupervisorError::RetriesExhausted(e))
            }
        }
    }

    async fn install(&mut self, connection: Connection) {
        self.last_session_id += 1;
        let session_id = self.last_session_id;
        let Connection { sink, source } = connection;

        *self.session.lock().await = Some(Session::new(session_id, sink));

        let reader = self.stop.child_token();
        tokio::spawn(
            inbound::read_loop(
                session_id,
                source,
                self.emitter.clone(),
                self.requests.clone(),
                reader.clone(),
            )
            .in_current_span(),
        );

        self.reader = Some(reader);
        self.current = Some(session_id);
        self.ever_connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!(session_id, "Connected");
    }

    /// Drop the current session, if any. Idempotent.
    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
        self.current = None;

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let session_id = session.id();
            match session.close().await {
                Ok(()) => debug!(session_id, "Session closed"),
                Err(e) => warn!(session_id, error = %e, "Error on connection close"),
            }
        }
    }

    async fn shutdown(&mut self) {
        self.stop.cancel();
        if time::timeout(CLOSE_TIMEOUT, self.disconnect()).await.is_err() {
            warn!(timeout = ?CLOSE_TIMEOUT, "Session did not close in time, dropping it");
        }
        self.set_state(ConnectionState::Stopped);
        info!("Supervisor stopped");
    }
}

fn health_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

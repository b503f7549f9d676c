//! # Adapters
//!
//! An adapter connects the bot to a chat service. It feeds received
//! messages into the dispatcher through an [`Emitter`] handed to it at
//! construction, and sends replies on the bot's behalf.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info_span};
use zha_bus::Emitter;
use zha_slack::{
    slack_supervisor, ConnectionSupervisor, Connector, SupervisorConfig, SupervisorError,
    SupervisorHandle, WebApiError,
};

/// Errors raised by an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("failed to build Web API client: {0}")]
    WebApi(#[from] WebApiError),

    #[error("supervisor task failed: {0}")]
    Task(#[from] JoinError),
}

/// Connection to a chat service.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Begin connecting. Returns once the request is accepted.
    async fn start(&self) -> Result<(), AdapterError>;

    /// Send `text` to `channel_id`.
    async fn send(&self, text: &str, channel_id: &str) -> Result<(), AdapterError>;

    /// Resolve once the adapter can no longer continue on its own,
    /// with the reason.
    async fn stopped(&self) -> Result<(), AdapterError>;

    /// Disconnect and release the adapter.
    async fn stop(&self) -> Result<(), AdapterError>;
}

/// Adapter backed by a [`ConnectionSupervisor`].
pub struct SlackAdapter {
    handle: SupervisorHandle,
    join: Mutex<Option<JoinHandle<Result<(), SupervisorError>>>>,
}

impl SlackAdapter {
    /// Build an adapter for the Slack RTM API.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AdapterError::WebApi` - the HTTP client could not be built
    pub fn connect(
        token: &str,
        emitter: Emitter,
        config: SupervisorConfig,
    ) -> Result<Self, AdapterError> {
        let supervisor = slack_supervisor(token, emitter, config)?;
        Ok(Self::new(supervisor.with_span(info_span!("slack"))))
    }

    /// Spawn `supervisor`. Must be called from within a Tokio runtime.
    pub fn new<C: Connector>(supervisor: ConnectionSupervisor<C>) -> Self {
        let (handle, join) = supervisor.spawn();
        Self {
            handle,
            join: Mutex::new(Some(join)),
        }
    }

    /// Handle to the underlying supervisor.
    #[must_use]
    pub fn handle(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// Wait for the supervisor task and take its result. Later calls
    /// return `Ok`.
    async fn finish(&self) -> Result<(), AdapterError> {
        let mut join = self.join.lock().await;
        let Some(task) = join.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        *join = None;
        debug!("Supervisor task finished");
        Ok(result??)
    }
}

#[async_trait]
impl Adapter for SlackAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(self.handle.start()?)
    }

    async fn send(&self, text: &str, channel_id: &str) -> Result<(), AdapterError> {
        Ok(self.handle.send(text, channel_id).await?)
    }

    async fn stopped(&self) -> Result<(), AdapterError> {
        self.handle.stopped().await;
        self.finish().await
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.handle.stop();
        self.finish().await
    }
}

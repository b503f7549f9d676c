//! # Zha Slack - RTM Adapter
//!
//! Connects the bot runtime to Slack's Real Time Messaging API.
//!
//! ```text
//!  Slack ◄──WebSocket──► ConnectionSupervisor ──emit──► zha_bus::Dispatcher
//!                              ▲                              │
//!                              └────── send(text, channel) ◄──┘ handlers
//! ```
//!
//! ## Modules
//!
//! - [`supervisor`]: session lifecycle, health checks, inbound/outbound tasks
//! - [`retry`]: bounded retry with jittered intervals
//! - [`rtm`]: JSON wire codec
//! - [`transport`]: connection traits, WebSocket and in-memory transports
//! - [`webapi`]: `rtm.start` and `chat.postMessage`

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod retry;
pub mod rtm;
pub mod supervisor;
pub mod transport;
pub mod webapi;

// Re-export main types
pub use retry::{RetryError, RetryPolicy, RetryPolicyError};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, OutboundMessage, SupervisorConfig, SupervisorError,
    SupervisorHandle,
};
pub use transport::{Connection, Connector, FrameSink, FrameSource, SlackConnector, TransportError};
pub use webapi::{PostMessage, WebApiClient, WebApiError};

/// Build a supervisor for Slack with the given bot token.
///
/// # Errors
///
/// - `WebApiError::Http` - the HTTP client could not be built
pub fn slack_supervisor(
    token: impl Into<String>,
    emitter: zha_bus::Emitter,
    config: SupervisorConfig,
) -> Result<ConnectionSupervisor<SlackConnector>, WebApiError> {
    let client = WebApiClient::new(token)?;
    Ok(ConnectionSupervisor::new(SlackConnector::new(client), emitter).with_config(config))
}

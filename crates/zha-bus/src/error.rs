//! # Dispatcher Errors

use std::time::Duration;

use thiserror::Error;

use crate::events::EventKind;

/// Errors rejecting a handler at registration time.
///
/// These are logged by the dispatcher; the handler is not installed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Custom kinds need a non-empty name.
    #[error("custom event kind has an empty name")]
    EmptyKindName,

    /// The kind is already bound to a different payload type.
    #[error("event kind {kind} is already registered with a different payload type")]
    PayloadTypeConflict {
        /// The conflicting kind.
        kind: EventKind,
    },
}

/// Errors from a single handler execution.
///
/// Logged by the dispatch loop, never returned to the emitter.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler returned an error: {0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked.
    #[error("handler panic: {0}")]
    Panicked(String),

    /// The handler did not finish within the configured timeout.
    #[error("deadline exceeded: handler still running after {timeout:?}")]
    DeadlineExceeded {
        /// The configured handler timeout.
        timeout: Duration,
    },

    /// The dispatch loop was cancelled while the handler was running.
    #[error("deadline exceeded: dispatch loop cancelled")]
    Cancelled,

    /// The handler task was aborted by the runtime.
    #[error("handler task aborted")]
    Aborted,

    /// The payload did not carry the type the handler was registered for.
    #[error("payload mismatch: handler expects {expected}, got {actual}")]
    PayloadMismatch {
        /// Kind the handler was registered for.
        expected: EventKind,
        /// Kind of the payload that reached it.
        actual: EventKind,
    },
}

impl HandlerError {
    /// Whether this error was produced by the timeout race.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. } | Self::Cancelled)
    }
}

/// Errors from the dispatcher itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// `process` was already called on this dispatcher.
    #[error("dispatch loop already started")]
    AlreadyProcessing,
}

//! # Zha Bus - Type-Indexed Event Dispatcher
//!
//! In-process event bus used by the bot runtime. Components emit typed
//! events; handlers registered for the event's kind are invoked in
//! registration order by a single dispatch loop.
//!
//! ```text
//! ┌──────────────┐   emit()   ┌──────────────┐  process()  ┌──────────────┐
//! │  Supervisor  │ ─────────► │ bounded queue│ ──────────► │  handlers    │
//! │  Bot / user  │            │  (FIFO)      │             │ (in order)   │
//! └──────────────┘            └──────────────┘             └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Envelopes are dispatched in emission order, one at a time
//! - Each handler runs isolated: a panic or error is logged, never fatal
//! - Each handler is bounded by the configured timeout
//! - Exactly one `Shutdown` event is dispatched when the loop is cancelled

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

use std::time::Duration;

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;

// Re-export main types
pub use dispatcher::{
    spawn_process, Completion, Dispatcher, DispatcherConfig, Emitter, EventEnvelope,
};
pub use error::{DispatchError, HandlerError, RegistrationError};
pub use events::{
    CustomPayload, Event, EventKind, EventPayload, InitEvent, ReceiveMessageEvent, ShutdownEvent,
};
pub use handler::{HandlerOutcome, HandlerRegistration, HandlerResult, HandlerTable};
pub use tokio_util::sync::CancellationToken;

/// Default capacity of the inbound event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default per-handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

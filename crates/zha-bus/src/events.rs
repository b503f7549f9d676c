//! # Bot Events
//!
//! Defines the event kinds that flow through the dispatcher.
//!
//! Built-in kinds are variants of [`EventPayload`]. Externally-defined kinds
//! travel as [`CustomPayload`] and are declared with [`custom_event!`]; their
//! concrete type is pinned the first time a handler registers for the kind.
//!
//! [`custom_event!`]: crate::custom_event

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Discriminator identifying the structural shape of an event payload.
///
/// Two envelopes reach the same handler set iff their kinds are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Emitted once at startup, before the adapter is told to connect.
    Init,
    /// A chat message decoded by the connection supervisor.
    ReceiveMessage,
    /// Synthesized exactly once when the dispatch loop is cancelled.
    Shutdown,
    /// Externally-defined kind, identified by name.
    Custom(&'static str),
}

impl EventKind {
    /// Human readable name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ReceiveMessage => "receive_message",
            Self::Shutdown => "shutdown",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Startup event. Carries no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitEvent;

/// Shutdown event. Carries no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownEvent;

/// A chat message received from the messaging service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveMessageEvent {
    /// Message body.
    pub text: String,
    /// Channel the message was posted in.
    pub channel_id: String,
}

impl ReceiveMessageEvent {
    /// Create a new message event.
    pub fn new(text: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Payload of an externally-defined event kind.
#[derive(Clone)]
pub struct CustomPayload {
    kind: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomPayload {
    /// Name of the custom kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Type descriptor of the carried value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.value.as_ref().type_id()
    }

    /// Borrow the carried value as `T`, if it has that type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPayload")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Tagged value of exactly one event kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// See [`InitEvent`].
    Init(InitEvent),
    /// See [`ReceiveMessageEvent`].
    ReceiveMessage(ReceiveMessageEvent),
    /// See [`ShutdownEvent`].
    Shutdown(ShutdownEvent),
    /// Externally-defined kind.
    Custom(CustomPayload),
}

impl EventPayload {
    /// Wrap a value as a custom payload of kind `kind`.
    pub fn custom<T: Any + Send + Sync>(kind: &'static str, value: T) -> Self {
        Self::Custom(CustomPayload {
            kind,
            value: Arc::new(value),
        })
    }

    /// The kind used to look up handlers.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Init(_) => EventKind::Init,
            Self::ReceiveMessage(_) => EventKind::ReceiveMessage,
            Self::Shutdown(_) => EventKind::Shutdown,
            Self::Custom(custom) => EventKind::Custom(custom.kind),
        }
    }

    /// Borrow a custom payload's value as `T`.
    ///
    /// Returns `None` for built-in kinds or when the value has another type.
    #[must_use]
    pub fn downcast_custom<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(custom) => custom.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// A structured record that can be emitted and handled.
///
/// The payload type of a handler determines the kind it is registered
/// against. Built-in events implement this trait here; external crates use
/// [`custom_event!`](crate::custom_event).
pub trait Event: Clone + Send + Sync + 'static {
    /// Kind this record is dispatched as.
    const KIND: EventKind;

    /// Convert into a tagged payload.
    fn into_payload(self) -> EventPayload;

    /// Extract this record from a payload of the matching kind.
    fn from_payload(payload: &EventPayload) -> Option<Self>;
}

impl Event for InitEvent {
    const KIND: EventKind = EventKind::Init;

    fn into_payload(self) -> EventPayload {
        EventPayload::Init(self)
    }

    fn from_payload(payload: &EventPayload) -> Option<Self> {
        match payload {
            EventPayload::Init(event) => Some(*event),
            _ => None,
        }
    }
}

impl Event for ReceiveMessageEvent {
    const KIND: EventKind = EventKind::ReceiveMessage;

    fn into_payload(self) -> EventPayload {
        EventPayload::ReceiveMessage(self)
    }

    fn from_payload(payload: &EventPayload) -> Option<Self> {
        match payload {
            EventPayload::ReceiveMessage(event) => Some(event.clone()),
            _ => None,
        }
    }
}

impl Event for ShutdownEvent {
    const KIND: EventKind = EventKind::Shutdown;

    fn into_payload(self) -> EventPayload {
        EventPayload::Shutdown(self)
    }

    fn from_payload(payload: &EventPayload) -> Option<Self> {
        match payload {
            EventPayload::Shutdown(event) => Some(*event),
            _ => None,
        }
    }
}

/// Declare an externally-defined event kind.
///
/// ```rust
/// #[derive(Debug, Clone)]
/// struct UserJoined {
///     user_id: String,
/// }
///
/// zha_bus::custom_event!(UserJoined, "user_joined");
///
/// use zha_bus::{Event, EventKind};
/// assert_eq!(UserJoined::KIND, EventKind::Custom("user_joined"));
/// ```
#[macro_export]
macro_rules! custom_event {
    ($ty:ty, $name:expr) => {
        impl $crate::Event for $ty {
            const KIND: $crate::EventKind = $crate::EventKind::Custom($name);

            fn into_payload(self) -> $crate::EventPayload {
                $crate::EventPayload::custom($name, self)
            }

            fn from_payload(payload: &$crate::EventPayload) -> Option<Self> {
                payload.downcast_custom::<$ty>().cloned()
            }
        }
    };
}

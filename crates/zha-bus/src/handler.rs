//! # Handler Table
//!
//! Maps each [`EventKind`] to the ordered list of handlers registered for it.
//!
//! Handlers come in two shapes, `(payload)` and `(cancellation token,
//! payload)`, each returning either `()` or `Result<(), E>`. Every shape is
//! wrapped once at registration by an explicit adapter into the uniform
//! [`HandlerRegistration`] callback; no shape inspection happens at dispatch.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, RegistrationError};
use crate::events::{Event, EventKind, EventPayload};

/// Result of one handler call after shape normalization.
pub type HandlerResult = Result<(), anyhow::Error>;

type Callback = dyn Fn(CancellationToken, EventPayload) -> BoxFuture<'static, HandlerResult>
    + Send
    + Sync;

/// Return types a handler may declare: `()` or a single error-like value.
pub trait HandlerOutcome: Send + 'static {
    /// Normalize into a [`HandlerResult`].
    fn into_result(self) -> HandlerResult;
}

impl HandlerOutcome for () {
    fn into_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> HandlerOutcome for Result<(), E>
where
    E: Into<anyhow::Error> + Send + 'static,
{
    fn into_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// A registered handler. Immutable once installed.
#[derive(Clone)]
pub struct HandlerRegistration {
    kind: EventKind,
    accepts_cancellation_token: bool,
    registration_order: u64,
    payload_type: TypeId,
    callback: Arc<Callback>,
}

impl HandlerRegistration {
    /// Adapter for handlers of shape `Fn(E) -> impl Future<Output = R>`.
    pub fn payload_only<E, F, Fut, R>(handler: F) -> Self
    where
        E: Event,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        let callback = move |_token: CancellationToken, payload: EventPayload| {
            match E::from_payload(&payload) {
                Some(event) => handler(event).map(HandlerOutcome::into_result).boxed(),
                None => mismatch::<E>(&payload),
            }
        };
        Self::from_callback::<E>(false, Arc::new(callback))
    }

    /// Adapter for handlers of shape `Fn(CancellationToken, E) -> impl Future<Output = R>`.
    pub fn with_token<E, F, Fut, R>(handler: F) -> Self
    where
        E: Event,
        F: Fn(CancellationToken, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        let callback = move |token: CancellationToken, payload: EventPayload| {
            match E::from_payload(&payload) {
                Some(event) => handler(token, event)
                    .map(HandlerOutcome::into_result)
                    .boxed(),
                None => mismatch::<E>(&payload),
            }
        };
        Self::from_callback::<E>(true, Arc::new(callback))
    }

    fn from_callback<E: Event>(accepts_cancellation_token: bool, callback: Arc<Callback>) -> Self {
        Self {
            kind: E::KIND,
            accepts_cancellation_token,
            registration_order: 0,
            payload_type: TypeId::of::<E>(),
            callback,
        }
    }

    /// Kind this handler is registered against.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the handler receives the cancellation token.
    #[must_use]
    pub fn accepts_cancellation_token(&self) -> bool {
        self.accepts_cancellation_token
    }

    /// Position among all registrations (assigned by the table).
    #[must_use]
    pub fn registration_order(&self) -> u64 {
        self.registration_order
    }

    /// Start the handler call. The returned future owns everything it needs.
    pub fn invoke(&self, token: CancellationToken, payload: EventPayload) -> BoxFuture<'static, HandlerResult> {
        (self.callback)(token, payload)
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("kind", &self.kind)
            .field("accepts_cancellation_token", &self.accepts_cancellation_token)
            .field("registration_order", &self.registration_order)
            .finish_non_exhaustive()
    }
}

fn mismatch<E: Event>(payload: &EventPayload) -> BoxFuture<'static, HandlerResult> {
    let error = HandlerError::PayloadMismatch {
        expected: E::KIND,
        actual: payload.kind(),
    };
    future::ready(Err(anyhow::Error::new(error))).boxed()
}

struct KindEntry {
    payload_type: TypeId,
    handlers: Vec<HandlerRegistration>,
}

/// Kind-indexed handler lists. No synchronization of its own.
#[derive(Default)]
pub struct HandlerTable {
    entries: HashMap<EventKind, KindEntry>,
    next_order: u64,
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration to its kind's list.
    ///
    /// Returns the assigned registration order.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::EmptyKindName` - custom kind without a name
    /// - `RegistrationError::PayloadTypeConflict` - kind bound to another type
    pub fn insert(&mut self, mut registration: HandlerRegistration) -> Result<u64, RegistrationError> {
        if registration.kind == EventKind::Custom("") {
            return Err(RegistrationError::EmptyKindName);
        }

        let entry = self
            .entries
            .entry(registration.kind)
            .or_insert_with(|| KindEntry {
                payload_type: registration.payload_type,
                handlers: Vec::new(),
            });

        if entry.payload_type != registration.payload_type {
            return Err(RegistrationError::PayloadTypeConflict {
                kind: registration.kind,
            });
        }

        let order = self.next_order;
        self.next_order += 1;
        registration.registration_order = order;
        entry.handlers.push(registration);
        Ok(order)
    }

    /// Snapshot of the handlers for `kind`, in registration order.
    #[must_use]
    pub fn handlers_for(&self, kind: EventKind) -> Vec<HandlerRegistration> {
        self.entries
            .get(&kind)
            .map(|entry| entry.handlers.clone())
            .unwrap_or_default()
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.get(&kind).map_or(0, |entry| entry.handlers.len())
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(|entry| entry.handlers.len()).sum()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! # Dispatcher
//!
//! Owns the inbound event queue and the [`HandlerTable`], and runs the
//! single-consumer dispatch loop.
//!
//! ## Execution model
//!
//! ```text
//!  Emitter::emit ──► [bounded queue] ──► process() loop
//!                                          │
//!                                          ├─► handler #1 (own task, timeout race)
//!                                          ├─► handler #2 (own task, timeout race)
//!                                          └─► completions (inline, in order)
//! ```
//!
//! Handlers for one envelope run one after another, each on an isolated
//! task. The loop waits for that task, the handler timeout, or the outer
//! cancellation, whichever comes first. A handler that loses the race is
//! **abandoned, not killed**: its task keeps running in the background and
//! only its cancellation token is cancelled. Handlers that must stop on
//! timeout should register with [`Dispatcher::register_with_token`] and
//! watch the token.
//!
//! A handler that emits into a full queue blocks until the loop frees a
//! slot, which it only does after that handler finishes or times out.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::error::{DispatchError, HandlerError};
use crate::events::{Event, EventKind, EventPayload, ShutdownEvent};
use crate::handler::{HandlerOutcome, HandlerRegistration, HandlerTable};
use crate::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_QUEUE_CAPACITY};

/// Callback run on the dispatch loop after all handlers of an envelope.
pub type Completion = Box<dyn FnOnce(&EventEnvelope) + Send + 'static>;

/// One emitted event plus its completion callbacks. Consumed exactly once.
pub struct EventEnvelope {
    payload: EventPayload,
    completions: Vec<Completion>,
}

impl EventEnvelope {
    /// Create an envelope without completions.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            completions: Vec::new(),
        }
    }

    /// Append a completion callback.
    #[must_use]
    pub fn with_completion(mut self, completion: impl FnOnce(&EventEnvelope) + Send + 'static) -> Self {
        self.completions.push(Box::new(completion));
        self
    }

    /// The event payload.
    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Kind of the payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl std::fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("payload", &self.payload)
            .field("completions", &self.completions.len())
            .finish()
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of the inbound queue; emitters block when it is full.
    pub queue_capacity: usize,
    /// Per-handler timeout. `Duration::ZERO` means unbounded.
    pub handler_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

/// Cloneable producer side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: mpsc::Sender<EventEnvelope>,
}

impl Emitter {
    /// Enqueue an event.
    ///
    /// Waits only while the queue is full; never waits for dispatch. If the
    /// dispatch loop has already shut down the event is logged and dropped.
    pub async fn emit<E: Event>(&self, event: E) {
        self.emit_envelope(EventEnvelope::new(event.into_payload()))
            .await;
    }

    /// Enqueue an event with completion callbacks, run in the given order.
    pub async fn emit_with<E, I>(&self, event: E, completions: I)
    where
        E: Event,
        I: IntoIterator<Item = Completion>,
    {
        let mut envelope = EventEnvelope::new(event.into_payload());
        envelope.completions.extend(completions);
        self.emit_envelope(envelope).await;
    }

    /// Enqueue a prepared envelope.
    pub async fn emit_envelope(&self, envelope: EventEnvelope) {
        let kind = envelope.kind();
        if let Err(e) = self.sender.send(envelope).await {
            warn!(event_kind = %e.0.kind(), "Event dropped (dispatch loop stopped)");
            return;
        }
        debug!(event_kind = %kind, "Event enqueued");
    }
}

/// Type-indexed event dispatcher.
pub struct Dispatcher {
    config: DispatcherConfig,
    handlers: RwLock<HandlerTable>,
    emitter: Emitter,
    receiver: Mutex<Option<mpsc::Receiver<EventEnvelope>>>,
    events_dispatched: AtomicU64,
    span: Span,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create a dispatcher with the given configuration.
    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            handlers: RwLock::new(HandlerTable::new()),
            emitter: Emitter { sender },
            receiver: Mutex::new(Some(receiver)),
            events_dispatched: AtomicU64::new(0),
            span: info_span!("dispatcher"),
        }
    }

    /// Replace the span the dispatch loop logs under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Register a `(payload)` handler.
    pub fn register<E, F, Fut, R>(&self, handler: F)
    where
        E: Event,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        self.install(HandlerRegistration::payload_only(handler));
    }

    /// Register a `(cancellation token, payload)` handler.
    ///
    /// The token is cancelled when the handler times out or the dispatch
    /// loop is cancelled.
    pub fn register_with_token<E, F, Fut, R>(&self, handler: F)
    where
        E: Event,
        F: Fn(CancellationToken, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        self.install(HandlerRegistration::with_token(handler));
    }

    fn install(&self, registration: HandlerRegistration) {
        let kind = registration.kind();
        let _enter = self.span.enter();
        match self.handlers.write().insert(registration) {
            Ok(order) => debug!(event_kind = %kind, order, "Registering new event handler"),
            Err(e) => error!(event_kind = %kind, error = %e, "Failed to register a handler"),
        }
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().count(kind)
    }

    /// Producer handle for other components.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    /// Enqueue an event. See [`Emitter::emit`].
    pub async fn emit<E: Event>(&self, event: E) {
        self.emitter.emit(event).await;
    }

    /// Enqueue an event with completions. See [`Emitter::emit_with`].
    pub async fn emit_with<E, I>(&self, event: E, completions: I)
    where
        E: Event,
        I: IntoIterator<Item = Completion>,
    {
        self.emitter.emit_with(event, completions).await;
    }

    /// Envelopes fully dispatched so far, including the final Shutdown.
    #[must_use]
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    /// Run the dispatch loop until `token` is cancelled.
    ///
    /// On cancellation, envelopes still queued are dropped and one
    /// [`ShutdownEvent`] is dispatched before returning. The Shutdown
    /// handlers run on a fresh token, bounded only by the handler timeout.
    ///
    /// # Errors
    ///
    /// - `DispatchError::AlreadyProcessing` - the loop was already started
    pub async fn process(&self, token: CancellationToken) -> Result<(), DispatchError> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(DispatchError::AlreadyProcessing)?;

        async {
            info!("Dispatch loop started");

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(envelope) => self.dispatch(envelope, &token).await,
                        None => break,
                    },
                }
            }

            receiver.close();
            let mut dropped = 0_usize;
            while receiver.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                warn!(dropped, "Dropping queued events on shutdown");
            }

            let shutdown = EventEnvelope::new(ShutdownEvent.into_payload());
            self.dispatch(shutdown, &CancellationToken::new()).await;

            info!("Dispatch loop stopped");
        }
        .instrument(self.span.clone())
        .await;

        Ok(())
    }

    async fn dispatch(&self, mut envelope: EventEnvelope, token: &CancellationToken) {
        let kind = envelope.kind();
        let handlers = self.handlers.read().handlers_for(kind);

        debug!(event_kind = %kind, handlers = handlers.len(), "Handling new event");

        for registration in &handlers {
            if token.is_cancelled() {
                debug!(event_kind = %kind, "Dispatch cancelled, skipping remaining handlers");
                break;
            }
            let payload = envelope.payload.clone();
            if let Err(e) = self.execute(registration, payload, token).await {
                error!(
                    event_kind = %kind,
                    order = registration.registration_order(),
                    error = %e,
                    "Event handler failed"
                );
            }
        }

        let completions = std::mem::take(&mut envelope.completions);
        for completion in completions {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| completion(&envelope)));
            if let Err(panic) = outcome {
                error!(
                    event_kind = %kind,
                    panic = %panic_message(panic.as_ref()),
                    "Completion callback panicked"
                );
            }
        }

        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    async fn execute(
        &self,
        registration: &HandlerRegistration,
        payload: EventPayload,
        outer: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let handler_token = outer.child_token();
        // The callback itself runs on the task, so a panic raised before its
        // future exists is caught too.
        let mut task = tokio::spawn({
            let registration = registration.clone();
            let token = handler_token.clone();
            async move { registration.invoke(token, payload).await }
        });

        let timeout = self.config.handler_timeout;
        let deadline = async move {
            if timeout.is_zero() {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(timeout).await;
            }
        };

        // Losing branches drop `task` without aborting it.
        tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result.map_err(HandlerError::Failed),
                Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(e.into_panic().as_ref()))),
                Err(_) => Err(HandlerError::Aborted),
            },
            () = deadline => {
                handler_token.cancel();
                Err(HandlerError::DeadlineExceeded { timeout })
            }
            () = outer.cancelled() => {
                handler_token.cancel();
                Err(HandlerError::Cancelled)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("handlers", &self.handlers.read().len())
            .field("events_dispatched", &self.events_dispatched())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Spawn [`Dispatcher::process`] on the current runtime.
pub fn spawn_process(
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), DispatchError>> {
    tokio::spawn(async move { dispatcher.process(token).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InitEvent, ReceiveMessageEvent};
    use std::time::Instant;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn done_signal() -> (Completion, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |_| {
            let _ = tx.send(());
        });
        (completion, rx)
    }

    async fn wait(rx: oneshot::Receiver<()>) {
        timeout(Duration::from_secs(5), rx)
            .await
            .expect("timeout")
            .expect("completion dropped");
    }

    #[tokio::test]
    async fn test_fan_out_in_registration_order() {
        let dispatcher = Arc::new(Dispatcher::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let calls = calls.clone();
            dispatcher.register(move |event: ReceiveMessageEvent| {
                let calls = calls.clone();
                async move {
                    calls.lock().push((id, event.text));
                }
            });
        }

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let (completion, rx) = done_signal();
        dispatcher
            .emit_with(ReceiveMessageEvent::new("ping", "C1"), [completion])
            .await;
        wait(rx).await;

        assert_eq!(
            *calls.lock(),
            vec![
                (0, "ping".to_string()),
                (1, "ping".to_string()),
                (2, "ping".to_string()),
            ]
        );

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_kind_without_handlers_still_completes() {
        let dispatcher = Arc::new(Dispatcher::new());
        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let (completion, rx) = done_signal();
        dispatcher.emit_with(InitEvent, [completion]).await;
        wait(rx).await;

        token.cancel();
        loop_handle.await.unwrap().unwrap();
        // Init plus the final Shutdown.
        assert_eq!(dispatcher.events_dispatched(), 2);
    }

    async fn panicking_handler(_: InitEvent) {
        panic!("boom");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let dispatcher = Arc::new(Dispatcher::new());
        let after = Arc::new(AtomicU64::new(0));

        dispatcher.register(panicking_handler);
        let counter = after.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        for _ in 0..2 {
            let (completion, rx) = done_signal();
            dispatcher.emit_with(InitEvent, [completion]).await;
            wait(rx).await;
        }

        assert_eq!(after.load(Ordering::SeqCst), 2);
        assert!(!loop_handle.is_finished());

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_panicking_before_its_future_is_isolated() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicU64::new(0));

        dispatcher.register(|event: ReceiveMessageEvent| {
            if event.text == "boom" {
                panic!("panicked while building the future");
            }
            async {}
        });
        let counter = hits.clone();
        dispatcher.register(move |_: ReceiveMessageEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        for text in ["boom", "ok"] {
            let (completion, rx) = done_signal();
            dispatcher
                .emit_with(ReceiveMessageEvent::new(text, "C1"), [completion])
                .await;
            wait(rx).await;
        }

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!loop_handle.is_finished());

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_handlers() {
        let dispatcher = Dispatcher::new();
        let token = CancellationToken::new();
        let skipped = Arc::new(AtomicU64::new(0));

        let cancel = token.clone();
        dispatcher.register(move |_: InitEvent| {
            let cancel = cancel.clone();
            async move {
                cancel.cancel();
                std::future::pending::<()>().await;
            }
        });
        let counter = skipped.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        dispatcher.emit(InitEvent).await;
        timeout(Duration::from_secs(5), dispatcher.process(token))
            .await
            .expect("timeout")
            .unwrap();

        assert_eq!(skipped.load(Ordering::SeqCst), 0);
        // Init plus the final Shutdown.
        assert_eq!(dispatcher.events_dispatched(), 2);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_later_handlers() {
        let dispatcher = Arc::new(Dispatcher::new());
        let reached = Arc::new(AtomicU64::new(0));

        dispatcher.register(|_: InitEvent| async { Err::<(), _>(anyhow::anyhow!("nope")) });
        let counter = reached.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let (completion, rx) = done_signal();
        dispatcher.emit_with(InitEvent, [completion]).await;
        wait(rx).await;

        assert_eq!(reached.load(Ordering::SeqCst), 1);
        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_handler_times_out_and_is_abandoned() {
        let handler_timeout = Duration::from_millis(50);
        let dispatcher = Arc::new(Dispatcher::with_config(DispatcherConfig {
            queue_capacity: 10,
            handler_timeout,
        }));

        let (cancelled_tx, cancelled_rx) = oneshot::channel();
        let cancelled_tx = Arc::new(Mutex::new(Some(cancelled_tx)));
        dispatcher.register_with_token(move |token: CancellationToken, _: InitEvent| {
            let cancelled_tx = cancelled_tx.clone();
            async move {
                tokio::time::sleep(handler_timeout * 2).await;
                if let Some(tx) = cancelled_tx.lock().take() {
                    let _ = tx.send(token.is_cancelled());
                }
            }
        });

        let next_ran = Arc::new(AtomicU64::new(0));
        let counter = next_ran.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let started = Instant::now();
        let (completion, rx) = done_signal();
        dispatcher.emit_with(InitEvent, [completion]).await;
        wait(rx).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= handler_timeout);
        assert!(elapsed < handler_timeout * 2);
        assert_eq!(next_ran.load(Ordering::SeqCst), 1);

        // The abandoned task still finishes, observing its cancelled token.
        let was_cancelled = timeout(Duration::from_secs(5), cancelled_rx)
            .await
            .expect("timeout")
            .expect("handler dropped");
        assert!(was_cancelled);

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_dispatched_once_with_queued_events() {
        let dispatcher = Arc::new(Dispatcher::new());
        let shutdowns = Arc::new(AtomicU64::new(0));
        let inits = Arc::new(AtomicU64::new(0));

        let counter = shutdowns.clone();
        dispatcher.register(move |_: ShutdownEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let counter = inits.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Queue events before the loop runs, then cancel up front.
        for _ in 0..3 {
            dispatcher.emit(InitEvent).await;
        }
        let token = CancellationToken::new();
        token.cancel();

        dispatcher.process(token).await.unwrap();

        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_twice_is_rejected() {
        let dispatcher = Dispatcher::new();
        let token = CancellationToken::new();
        token.cancel();

        dispatcher.process(token.clone()).await.unwrap();
        assert_eq!(
            dispatcher.process(token).await,
            Err(DispatchError::AlreadyProcessing)
        );
    }

    #[tokio::test]
    async fn test_completions_run_in_order_after_handlers() {
        let dispatcher = Arc::new(Dispatcher::new());
        let trace = Arc::new(Mutex::new(Vec::new()));

        let handler_trace = trace.clone();
        dispatcher.register(move |_: InitEvent| {
            let trace = handler_trace.clone();
            async move {
                trace.lock().push("handler");
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let first_trace = trace.clone();
        let first: Completion = Box::new(move |envelope| {
            assert_eq!(envelope.kind(), EventKind::Init);
            first_trace.lock().push("first");
        });
        let second_trace = trace.clone();
        let second: Completion = Box::new(move |_| second_trace.lock().push("second"));
        let (done, rx) = done_signal();

        dispatcher.emit_with(InitEvent, [first, second, done]).await;
        wait(rx).await;

        assert_eq!(*trace.lock(), vec!["handler", "first", "second"]);
        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_emit_blocks_when_queue_full() {
        let dispatcher = Dispatcher::with_config(DispatcherConfig {
            queue_capacity: 1,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        });

        dispatcher.emit(InitEvent).await;
        let blocked = timeout(Duration::from_millis(50), dispatcher.emit(InitEvent)).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_is_dropped() {
        let dispatcher = Dispatcher::new();
        let token = CancellationToken::new();
        token.cancel();
        dispatcher.process(token).await.unwrap();

        // Must return promptly instead of waiting on a closed queue.
        timeout(Duration::from_secs(1), dispatcher.emit(InitEvent))
            .await
            .expect("emit blocked after shutdown");
    }

    #[tokio::test]
    async fn test_received_messages_collected() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let invocations = Arc::new(AtomicU64::new(0));

        let list = seen.clone();
        let count = invocations.clone();
        dispatcher.register(move |event: ReceiveMessageEvent| {
            let list = list.clone();
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                list.lock().push(event.text);
            }
        });

        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        dispatcher.emit(ReceiveMessageEvent::new("hello", "C1")).await;
        let (completion, rx) = done_signal();
        dispatcher
            .emit_with(ReceiveMessageEvent::new("hello", "C1"), [completion])
            .await;
        wait(rx).await;

        assert_eq!(*seen.lock(), vec!["hello".to_string(), "hello".to_string()]);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_registration_during_processing() {
        let dispatcher = Arc::new(Dispatcher::new());
        let token = CancellationToken::new();
        let loop_handle = spawn_process(dispatcher.clone(), token.clone());

        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        dispatcher.register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(dispatcher.handler_count(EventKind::Init), 1);

        let (completion, rx) = done_signal();
        dispatcher.emit_with(InitEvent, [completion]).await;
        wait(rx).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        token.cancel();
        loop_handle.await.unwrap().unwrap();
    }
}

//! # Bot
//!
//! Ties the dispatcher, the memory and an adapter together.
//!
//! ## Lifecycle
//!
//! ```text
//! run(token)
//!   ├─ spawn dispatch loop (child of token)
//!   ├─ emit Init
//!   ├─ adapter.start()
//!   ├─ wait: token cancelled | adapter stopped on its own
//!   ├─ cancel dispatch loop ──► Shutdown handlers run
//!   ├─ adapter.stop()
//!   └─ memory.close()
//! ```

use std::future::Future;
use std::sync::Arc;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use zha_bus::{
    spawn_process, Dispatcher, DispatcherConfig, Emitter, HandlerOutcome, HandlerResult,
    InitEvent, ReceiveMessageEvent,
};
use zha_memory::{InMemory, Memory};

use crate::adapter::Adapter;
use crate::error::BotError;
use crate::message::{Message, Outbox};

/// A chat bot.
pub struct Bot {
    name: String,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<dyn Memory>,
    outbox: Outbox,
    span: Span,
}

impl Bot {
    /// Create a bot with the default dispatcher configuration and an
    /// in-process memory.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DispatcherConfig::default())
    }

    /// Create a bot with the given dispatcher configuration.
    pub fn with_config(name: impl Into<String>, config: DispatcherConfig) -> Self {
        let name = name.into();
        let span = info_span!("bot", name = %name);
        let dispatcher = Dispatcher::with_config(config)
            .with_span(info_span!(parent: &span, "dispatcher"));
        info!(name = %name, "Init bot");

        Self {
            name,
            dispatcher: Arc::new(dispatcher),
            memory: Arc::new(InMemory::new()),
            outbox: Outbox::default(),
            span,
        }
    }

    /// Replace the memory. Handlers registered earlier keep the previous one.
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = memory;
        self
    }

    /// Replace the span `run` logs under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the adapter. Replies sent after this go through it.
    pub fn set_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.outbox.set(adapter);
    }

    /// The bot's dispatcher, for registering raw event handlers.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Producer handle for adapters.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        self.dispatcher.emitter()
    }

    /// The bot's memory.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    /// Call `handler` for every received message whose whole text matches
    /// `pattern`, ignoring case.
    ///
    /// An invalid pattern is logged and nothing is registered.
    pub fn respond<F, Fut, R>(&self, pattern: &str, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        let regex = match compile_pattern(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                error!(pattern, error = %e, "Failed to add response handler");
                return;
            }
        };
        debug!(pattern, "Adding response handler");

        let outbox = self.outbox.clone();
        let memory = self.memory.clone();
        self.dispatcher
            .register_with_token(move |token: CancellationToken, event: ReceiveMessageEvent| {
                let reply = capture_groups(&regex, &event.text).map(|matches| {
                    handler(Message::new(
                        event.text,
                        event.channel_id,
                        matches,
                        token,
                        outbox.clone(),
                        memory.clone(),
                    ))
                });

                async move {
                    match reply {
                        Some(reply) => reply.await.into_result(),
                        None => HandlerResult::Ok(()),
                    }
                }
            });
    }

    /// Run until `token` is cancelled or the adapter stops on its own.
    ///
    /// # Errors
    ///
    /// - `BotError::NoAdapter` - no adapter was set
    /// - `BotError::Adapter` - the adapter failed to start or stopped with an error
    /// - `BotError::Dispatch` - the dispatch loop was already running
    pub async fn run(&self, token: CancellationToken) -> Result<(), BotError> {
        let adapter = self.outbox.adapter().ok_or(BotError::NoAdapter)?;

        async {
            let dispatch_token = token.child_token();
            let process = spawn_process(self.dispatcher.clone(), dispatch_token.clone());

            self.dispatcher.emit(InitEvent).await;

            let outcome = match adapter.start().await {
                Ok(()) => {
                    info!(name = %self.name, "Bot initialized and ready to operate");
                    tokio::select! {
                        () = token.cancelled() => {
                            info!("Shutdown requested");
                            Ok(())
                        }
                        result = adapter.stopped() => {
                            if let Err(e) = &result {
                                error!(error = %e, "Adapter stopped");
                            } else {
                                warn!("Adapter stopped");
                            }
                            result.map_err(BotError::from)
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to start adapter");
                    Err(BotError::from(e))
                }
            };

            dispatch_token.cancel();
            let dispatched = match process.await {
                Ok(result) => result.map_err(BotError::from),
                Err(e) => Err(BotError::from(e)),
            };

            info!(name = %self.name, "Bot is shutting down");
            if let Err(e) = adapter.stop().await {
                warn!(error = %e, "Error while stopping adapter");
            }
            if let Err(e) = self.memory.close().await {
                warn!(error = %e, "Error while closing memory");
            }

            outcome.and(dispatched)
        }
        .instrument(self.span.clone())
        .await
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

/// Anchor `pattern` to the whole text and make it case-insensitive.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?i){pattern}$"))
}

fn capture_groups(regex: &Regex, text: &str) -> Option<Vec<String>> {
    let captures = regex.captures(text)?;
    Some(
        captures
            .iter()
            .skip(1)
            .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use zha_bus::{Completion, ShutdownEvent};
    use zha_slack::SupervisorError;

    use crate::adapter::AdapterError;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct FakeAdapter {
        sent: Mutex<Vec<(String, String)>>,
        started: AtomicBool,
        stop_calls: AtomicUsize,
        fail: CancellationToken,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        async fn start(&self) -> Result<(), AdapterError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, text: &str, channel_id: &str) -> Result<(), AdapterError> {
            self.sent
                .lock()
                .push((text.to_string(), channel_id.to_string()));
            Ok(())
        }

        async fn stopped(&self) -> Result<(), AdapterError> {
            self.fail.cancelled().await;
            Err(AdapterError::Supervisor(SupervisorError::Stopped))
        }

        async fn stop(&self) -> Result<(), AdapterError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn done_signal() -> (Completion, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |_| {
            let _ = tx.send(());
        });
        (completion, rx)
    }

    async fn deliver(bot: &Bot, text: &str, channel_id: &str) {
        let (done, rx) = done_signal();
        bot.dispatcher()
            .emit_with(ReceiveMessageEvent::new(text, channel_id), [done])
            .await;
        timeout(WAIT, rx).await.unwrap().unwrap();
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_pattern_is_anchored_and_case_insensitive() {
        let regex = compile_pattern("echo (.+)").unwrap();
        assert_eq!(
            capture_groups(&regex, "ECHO hello"),
            Some(vec!["hello".to_string()])
        );
        assert_eq!(capture_groups(&regex, "please echo hello"), None);
        assert!(compile_pattern("(").is_err());
    }

    #[test]
    fn test_unmatched_optional_group_is_empty() {
        let regex = compile_pattern("hi( there)?").unwrap();
        assert_eq!(capture_groups(&regex, "hi"), Some(vec![String::new()]));
    }

    #[tokio::test]
    async fn test_respond_replies_in_channel() {
        let bot = Bot::new("test");
        let adapter = Arc::new(FakeAdapter::default());
        bot.set_adapter(adapter.clone());

        bot.respond("echo (.+)", |message: Message| async move {
            let reply = format!("you said {}", message.matched(0).unwrap_or_default());
            message.respond(reply).await
        });

        let token = CancellationToken::new();
        let process = spawn_process(bot.dispatcher().clone(), token.clone());

        deliver(&bot, "Echo hello", "C1").await;
        deliver(&bot, "no match here", "C1").await;

        assert_eq!(
            *adapter.sent.lock(),
            vec![("you said hello".to_string(), "C1".to_string())]
        );

        token.cancel();
        process.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_pattern_not_registered() {
        let bot = Bot::new("test");
        bot.respond("(unclosed", |_message: Message| async {});
        assert_eq!(bot.dispatcher().handler_count(zha_bus::EventKind::ReceiveMessage), 0);

        bot.respond("fine", |_message: Message| async {});
        assert_eq!(bot.dispatcher().handler_count(zha_bus::EventKind::ReceiveMessage), 1);
    }

    #[tokio::test]
    async fn test_reply_without_adapter_is_error() {
        let bot = Bot::new("test");
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        bot.respond("ping", move |message: Message| {
            let tx = tx.clone();
            async move {
                let result = message.respond("pong").await;
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(matches!(result, Err(BotError::NoAdapter)));
                }
            }
        });

        let token = CancellationToken::new();
        let process = spawn_process(bot.dispatcher().clone(), token.clone());
        deliver(&bot, "PING", "C9").await;

        assert!(timeout(WAIT, rx).await.unwrap().unwrap());
        token.cancel();
        process.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handlers_share_memory() {
        let bot = Bot::new("test");
        bot.set_adapter(Arc::new(FakeAdapter::default()));
        bot.respond(r"remember (\S+) (.+)", |message: Message| async move {
            message
                .memory()
                .set(&message.matches[0], &message.matches[1])
                .await
                .map_err(BotError::from)
        });

        let token = CancellationToken::new();
        let process = spawn_process(bot.dispatcher().clone(), token.clone());
        deliver(&bot, "remember color blue", "C1").await;

        assert_eq!(bot.memory().get("color").await.unwrap(), Some("blue".to_string()));
        token.cancel();
        process.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_without_adapter() {
        let bot = Bot::new("test");
        let result = bot.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(BotError::NoAdapter)));
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let bot = Arc::new(Bot::new("test"));
        let adapter = Arc::new(FakeAdapter::default());
        bot.set_adapter(adapter.clone());
        bot.memory().set("key", "value").await.unwrap();

        let inits = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        {
            let inits = inits.clone();
            bot.dispatcher().register(move |_: InitEvent| {
                let inits = inits.clone();
                async move {
                    inits.fetch_add(1, Ordering::SeqCst);
                }
            });
            let shutdowns = shutdowns.clone();
            bot.dispatcher().register(move |_: ShutdownEvent| {
                let shutdowns = shutdowns.clone();
                async move {
                    shutdowns.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        let token = CancellationToken::new();
        let run = tokio::spawn({
            let bot = bot.clone();
            let token = token.clone();
            async move { bot.run(token).await }
        });

        wait_until(|| adapter.started.load(Ordering::SeqCst) && inits.load(Ordering::SeqCst) == 1)
            .await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

        token.cancel();
        timeout(WAIT, run).await.unwrap().unwrap().unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.stop_calls.load(Ordering::SeqCst), 1);
        assert!(bot.memory().memories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_ends_when_adapter_fails() {
        let bot = Arc::new(Bot::new("test"));
        let adapter = Arc::new(FakeAdapter::default());
        bot.set_adapter(adapter.clone());

        let run = tokio::spawn({
            let bot = bot.clone();
            async move { bot.run(CancellationToken::new()).await }
        });

        wait_until(|| adapter.started.load(Ordering::SeqCst)).await;
        adapter.fail.cancel();

        let result = timeout(WAIT, run).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(BotError::Adapter(AdapterError::Supervisor(SupervisorError::Stopped)))
        ));
        assert_eq!(adapter.stop_calls.load(Ordering::SeqCst), 1);
    }
}

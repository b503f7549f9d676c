//! # Bot Runtime Flows
//!
//! A [`zha_bot::Bot`] running the built-in commands against a Slack
//! adapter over the in-memory transport.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use zha_bot::{commands, AdapterError, Bot, BotError, SlackAdapter};
    use zha_bus::{CancellationToken, InitEvent, ShutdownEvent};
    use zha_memory::{FileMemory, Memory};
    use zha_slack::transport::{memory_transport, MemoryPeer, MemoryServer};
    use zha_slack::{
        ConnectionState, ConnectionSupervisor, RetryPolicy, SupervisorConfig, SupervisorError,
        SupervisorHandle,
    };

    const WAIT: Duration = Duration::from_secs(5);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Running {
        bot: Arc<Bot>,
        handle: SupervisorHandle,
        server: MemoryServer,
        token: CancellationToken,
        run: JoinHandle<Result<(), BotError>>,
        inits: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    fn start_bot(bot: Bot, max_tries: u32) -> Running {
        let (connector, server) = memory_transport();
        let config = SupervisorConfig {
            health_check_interval: Duration::ZERO,
            retry: RetryPolicy::interval(max_tries, Duration::from_millis(1)).unwrap(),
            ..SupervisorConfig::default()
        };
        let adapter = SlackAdapter::new(
            ConnectionSupervisor::new(connector, bot.emitter()).with_config(config),
        );
        let handle = adapter.handle().clone();
        bot.set_adapter(Arc::new(adapter));
        commands::register_builtin(&bot);

        let inits = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        bot.dispatcher().register(move |_: InitEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let counter = shutdowns.clone();
        bot.dispatcher().register(move |_: ShutdownEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let bot = Arc::new(bot);
        let token = CancellationToken::new();
        let run = tokio::spawn({
            let bot = bot.clone();
            let token = token.clone();
            async move { bot.run(token).await }
        });

        Running {
            bot,
            handle,
            server,
            token,
            run,
            inits,
            shutdowns,
        }
    }

    async fn connect(running: &mut Running) -> MemoryPeer {
        let peer = timeout(WAIT, running.server.accept()).await.unwrap().unwrap();
        timeout(WAIT, running.handle.wait_for_state(ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
        peer
    }

    async fn say(peer: &mut MemoryPeer, text: &str) -> String {
        let frame = serde_json::json!({"type": "message", "channel": "C1", "user": "U1", "text": text});
        assert!(peer.push(frame.to_string()));

        let reply = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["channel"], "C1");
        reply["text"].as_str().unwrap().to_string()
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    #[tokio::test]
    async fn test_conversation_then_clean_shutdown() {
        let mut running = start_bot(Bot::new("flow"), 3);
        let mut peer = connect(&mut running).await;

        assert_eq!(say(&mut peer, "PING").await, "pong");
        assert_eq!(say(&mut peer, "echo round trip").await, "round trip");
        assert_eq!(say(&mut peer, "remember city Skopje").await, "I'll remember city");
        assert_eq!(say(&mut peer, "recall city").await, "city is Skopje");

        running.token.cancel();
        timeout(WAIT, running.run).await.unwrap().unwrap().unwrap();

        assert_eq!(running.inits.load(Ordering::SeqCst), 1);
        assert_eq!(running.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(running.handle.state(), ConnectionState::Stopped);
        assert!(peer.is_closed());
        assert!(running.bot.memory().memories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_the_run() {
        let running = start_bot(Bot::new("flow"), 3);
        running.server.fail_always();

        let result = timeout(WAIT, running.run).await.unwrap().unwrap();
        let Err(BotError::Adapter(AdapterError::Supervisor(SupervisorError::RetriesExhausted(
            error,
        )))) = &result
        else {
            panic!("expected exhausted retries, got {result:?}");
        };
        assert_eq!(error.failures().len(), 3);
        assert_eq!(running.server.lookups(), 3);
        assert_eq!(running.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_file_memory_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let memory: Arc<dyn Memory> = Arc::new(FileMemory::open(&path).await.unwrap());
        let mut running = start_bot(Bot::new("flow").with_memory(memory), 3);
        let mut peer = connect(&mut running).await;
        assert_eq!(say(&mut peer, "remember color blue").await, "I'll remember color");

        running.token.cancel();
        timeout(WAIT, running.run).await.unwrap().unwrap().unwrap();

        let reopened = FileMemory::open(&path).await.unwrap();
        assert_eq!(reopened.get("color").await.unwrap(), Some("blue".to_string()));
    }
}

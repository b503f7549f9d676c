//! # Dispatcher ⇄ Supervisor Flows
//!
//! Inbound frames reach dispatcher handlers, and handler replies travel
//! back through the supervisor's outbound queue, across reconnects.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use zha_bus::{spawn_process, CancellationToken, DispatchError, Dispatcher, ReceiveMessageEvent};
    use zha_slack::transport::{memory_transport, MemoryPeer, MemoryServer};
    use zha_slack::{
        ConnectionState, ConnectionSupervisor, RetryPolicy, SupervisorConfig, SupervisorError,
        SupervisorHandle,
    };

    const WAIT: Duration = Duration::from_secs(5);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct EchoBot {
        handle: SupervisorHandle,
        supervisor: JoinHandle<Result<(), SupervisorError>>,
        server: MemoryServer,
        token: CancellationToken,
        process: JoinHandle<Result<(), DispatchError>>,
    }

    /// Dispatcher with an echo handler wired to a supervisor over the
    /// in-memory transport. Health checks are disabled so only replies are
    /// written.
    fn echo_bot() -> EchoBot {
        let dispatcher = Arc::new(Dispatcher::new());
        let (connector, server) = memory_transport();
        let config = SupervisorConfig {
            health_check_interval: Duration::ZERO,
            retry: RetryPolicy::interval(3, Duration::from_millis(1)).unwrap(),
            ..SupervisorConfig::default()
        };
        let (handle, supervisor) = ConnectionSupervisor::new(connector, dispatcher.emitter())
            .with_config(config)
            .spawn();

        let replies = handle.clone();
        dispatcher.register(move |event: ReceiveMessageEvent| {
            let replies = replies.clone();
            async move {
                replies
                    .send(format!("echo: {}", event.text), event.channel_id)
                    .await
            }
        });

        let token = CancellationToken::new();
        let process = spawn_process(dispatcher, token.clone());

        EchoBot {
            handle,
            supervisor,
            server,
            token,
            process,
        }
    }

    async fn connect(bot: &mut EchoBot) -> MemoryPeer {
        let peer = timeout(WAIT, bot.server.accept()).await.unwrap().unwrap();
        timeout(WAIT, bot.handle.wait_for_state(ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
        peer
    }

    fn message_frame(channel: &str, text: &str) -> String {
        serde_json::json!({
            "type": "message",
            "channel": channel,
            "user": "U1",
            "text": text,
            "ts": "1355517523.000005",
        })
        .to_string()
    }

    async fn next_frame(peer: &mut MemoryPeer) -> Value {
        let frame = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    async fn shut_down(bot: EchoBot) {
        bot.handle.stop();
        timeout(WAIT, bot.supervisor).await.unwrap().unwrap().unwrap();
        bot.token.cancel();
        timeout(WAIT, bot.process).await.unwrap().unwrap().unwrap();
    }

    // =============================================================================
    // INTEGRATION TESTS
    // =============================================================================

    #[tokio::test]
    async fn test_message_is_answered_on_the_same_session() {
        let mut bot = echo_bot();
        bot.handle.start().unwrap();
        let mut peer = connect(&mut bot).await;

        assert!(peer.push(r#"{"type":"hello"}"#));
        assert!(peer.push(message_frame("C1", "hello")));
        assert!(peer.push(message_frame("C2", "again")));

        let first = next_frame(&mut peer).await;
        assert_eq!(first["type"], "message");
        assert_eq!(first["id"], 1);
        assert_eq!(first["channel"], "C1");
        assert_eq!(first["text"], "echo: hello");

        let second = next_frame(&mut peer).await;
        assert_eq!(second["id"], 2);
        assert_eq!(second["channel"], "C2");
        assert_eq!(second["text"], "echo: again");

        shut_down(bot).await;
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_undecodable_frames_do_not_stop_ingestion() {
        let mut bot = echo_bot();
        bot.handle.start().unwrap();
        let mut peer = connect(&mut bot).await;

        assert!(peer.push("not json"));
        assert!(peer.push(r#"{"type":"presence_change"}"#));
        assert!(peer.push(r#"{"reply_to":1}"#));
        assert!(peer.push(r#"{"ok":false,"reply_to":1,"text":"channel_not_found"}"#));
        assert!(peer.push(message_frame("C1", "still here")));

        let reply = next_frame(&mut peer).await;
        assert_eq!(reply["text"], "echo: still here");
        assert_eq!(bot.handle.state(), ConnectionState::Connected);

        shut_down(bot).await;
    }

    #[tokio::test]
    async fn test_replies_continue_after_reconnect() {
        let mut bot = echo_bot();
        bot.handle.start().unwrap();
        let mut first = connect(&mut bot).await;

        first.hang_up();
        let mut second = connect(&mut bot).await;
        assert!(first.is_closed());

        assert!(second.push(message_frame("C1", "after")));
        let reply = next_frame(&mut second).await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["text"], "echo: after");

        shut_down(bot).await;
    }

    #[tokio::test]
    async fn test_team_migration_moves_the_session() {
        let mut bot = echo_bot();
        bot.handle.start().unwrap();
        let first = connect(&mut bot).await;

        assert!(first.push(r#"{"type":"team_migration_started"}"#));
        let mut second = connect(&mut bot).await;
        assert!(first.is_closed());

        assert!(second.push(message_frame("C3", "moved")));
        assert_eq!(next_frame(&mut second).await["text"], "echo: moved");

        shut_down(bot).await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_the_supervisor() {
        let bot = echo_bot();
        bot.server.fail_always();
        bot.handle.start().unwrap();

        let result = timeout(WAIT, bot.supervisor).await.unwrap().unwrap();
        let Err(SupervisorError::RetriesExhausted(error)) = &result else {
            panic!("expected exhausted retries, got {result:?}");
        };
        assert_eq!(error.failures().len(), 3);
        assert_eq!(bot.server.lookups(), 3);
        assert_eq!(bot.handle.state(), ConnectionState::Stopped);
        assert!(matches!(
            bot.handle.send("late", "C1").await,
            Err(SupervisorError::Stopped)
        ));

        bot.token.cancel();
        timeout(WAIT, bot.process).await.unwrap().unwrap().unwrap();
    }
}

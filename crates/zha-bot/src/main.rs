//! # Zha Bot
//!
//! Slack bot binary. Configuration comes from the environment, see
//! [`BotConfig::from_env`].
//!
//! ## Startup Sequence
//!
//! 1. Load configuration
//! 2. Install the log subscriber
//! 3. Open memory (in-process map, JSON file or Redis hash)
//! 4. Spawn the Slack connection supervisor
//! 5. Register the built-in commands
//! 6. Run until Ctrl-C

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use zha_bot::{commands, init_logging, Bot, BotConfig, SlackAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = BotConfig::from_env().context("failed to read configuration")?;
    init_logging(&config.log_level, config.json_logs).context("failed to initialize logging")?;

    info!(name = %config.name, "Starting zha bot");

    let memory = config
        .memory
        .open()
        .await
        .context("failed to open memory")?;

    let bot = Bot::with_config(&config.name, config.dispatcher_config()).with_memory(memory);

    let token = config.slack_token().context("Slack token required")?;
    let adapter = SlackAdapter::connect(token, bot.emitter(), config.supervisor_config()?)
        .context("failed to create Slack adapter")?;
    bot.set_adapter(Arc::new(adapter));

    commands::register_builtin(&bot);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
            }
            shutdown.cancel();
        }
    });

    bot.run(shutdown).await.context("bot stopped with an error")?;
    info!("Goodbye");
    Ok(())
}

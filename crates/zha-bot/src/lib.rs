//! # Zha Bot - Chat Bot Runtime
//!
//! A bot owns a [`zha_bus::Dispatcher`], a [`zha_memory::Memory`] and an
//! [`Adapter`] to a chat service.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zha_bot::{Bot, Message, SlackAdapter};
//! use zha_bus::CancellationToken;
//!
//! # async fn example() -> Result<(), zha_bot::BotError> {
//! let bot = Bot::new("zha");
//! let adapter = SlackAdapter::connect("xoxb-token", bot.emitter(), Default::default())?;
//! bot.set_adapter(Arc::new(adapter));
//!
//! bot.respond("hello", |message: Message| async move {
//!     message.respond("hi!").await
//! });
//!
//! bot.run(CancellationToken::new()).await
//! # }
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapter;
pub mod bot;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;

pub use adapter::{Adapter, AdapterError, SlackAdapter};
pub use bot::Bot;
pub use config::{BotConfig, ConfigError, MemoryBackend};
pub use error::BotError;
pub use logging::{init_logging, LoggingError};
pub use message::{Message, Outbox};

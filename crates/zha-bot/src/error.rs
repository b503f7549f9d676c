//! # Bot Errors

use thiserror::Error;
use tokio::task::JoinError;
use zha_bus::DispatchError;
use zha_memory::MemoryError;

use crate::adapter::AdapterError;
use crate::config::ConfigError;

/// Errors surfaced by the bot runtime.
#[derive(Debug, Error)]
pub enum BotError {
    /// `run` or a reply needs an adapter and none is set.
    #[error("no adapter configured")]
    NoAdapter,

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("dispatch loop task failed: {0}")]
    Task(#[from] JoinError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

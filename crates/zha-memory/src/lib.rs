//! # Zha Memory - Key/Value Stores
//!
//! The bot's persistent scratch space. Every backend implements [`Memory`]
//! with identical semantics:
//!
//! | Operation  | Result                                      |
//! |------------|---------------------------------------------|
//! | `get`      | `Some(value)` or `None` if the key is absent |
//! | `set`      | stores or overwrites                        |
//! | `delete`   | `true` if the key existed                   |
//! | `memories` | a copy of every entry                       |
//! | `close`    | releases the backend                        |
//!
//! ## Backends
//!
//! - [`InMemory`]: process-local map, cleared on close
//! - [`FileMemory`]: JSON object file, rewritten on every mutation
//! - [`RedisMemory`]: one Redis hash, shared by every bot using the same key
//!
//! Operations are async so handlers never block a runtime worker on I/O.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::HashMap;

use async_trait::async_trait;

pub mod error;
pub mod file;
pub mod in_memory;
pub mod redis_hash;

pub use error::MemoryError;
pub use file::FileMemory;
pub use in_memory::InMemory;
pub use redis_hash::{RedisMemory, DEFAULT_REDIS_KEY};

/// Key/value store shared by the bot and its handlers.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Backend specific, e.g. `MemoryError::Closed`.
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Store a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Backend specific, e.g. `MemoryError::Closed` or `MemoryError::Io`.
    async fn set(&self, key: &str, value: &str) -> Result<(), MemoryError>;

    /// Remove a key. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Backend specific.
    async fn delete(&self, key: &str) -> Result<bool, MemoryError>;

    /// Copy of every entry.
    ///
    /// # Errors
    ///
    /// Backend specific.
    async fn memories(&self) -> Result<HashMap<String, String>, MemoryError>;

    /// Release the backend.
    ///
    /// # Errors
    ///
    /// Backend specific.
    async fn close(&self) -> Result<(), MemoryError>;
}

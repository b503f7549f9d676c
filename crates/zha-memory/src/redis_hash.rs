//! Memory kept in a single Redis hash.
//!
//! Every entry is a field of the hash named by the memory's key, so bots
//! sharing a key share their memory. Operations go through one
//! multiplexed connection; a dropped connection surfaces as
//! `MemoryError::Redis` on the next call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::{Memory, MemoryError};

/// Hash used when no key is configured.
pub const DEFAULT_REDIS_KEY: &str = "zha-bot";

/// Redis-backed memory. Unusable after [`Memory::close`].
pub struct RedisMemory {
    key: String,
    connection: MultiplexedConnection,
    closed: AtomicBool,
}

impl RedisMemory {
    /// Connect to the server at `url` (`redis://[:password@]host[:port][/db]`)
    /// and keep entries in the hash `key`.
    ///
    /// # Errors
    ///
    /// - `MemoryError::Redis` - invalid URL, unreachable server or failed ping
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, MemoryError> {
        let key = key.into();
        let client = redis::Client::open(url)?;
        let addr = client.get_connection_info().addr.to_string();
        debug!(addr = %addr, key = %key, "Connecting to redis memory");

        let mut connection = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;

        info!(addr = %addr, key = %key, "Memory initialized successfully");
        Ok(Self {
            key,
            connection,
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the backing hash.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn connection(&self) -> Result<MultiplexedConnection, MemoryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MemoryError::Closed);
        }
        Ok(self.connection.clone())
    }
}

impl std::fmt::Debug for RedisMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMemory")
            .field("key", &self.key)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Memory for RedisMemory {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let mut connection = self.connection()?;
        debug!(key, "Retrieving data from memory");
        let value: Option<String> = connection.hget(&self.key, key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut connection = self.connection()?;
        debug!(key, "Writing data to memory");
        let _: () = connection.hset(&self.key, key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        let mut connection = self.connection()?;
        debug!(key, "Deleting data from memory");
        let removed: i64 = connection.hdel(&self.key, key).await?;
        Ok(removed > 0)
    }

    async fn memories(&self) -> Result<HashMap<String, String>, MemoryError> {
        let mut connection = self.connection()?;
        let entries: HashMap<String, String> = connection.hgetall(&self.key).await?;
        Ok(entries)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(MemoryError::Closed);
        }
        debug!(key = %self.key, "Shutting down memory");
        Ok(())
    }
}

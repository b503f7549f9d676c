//! Process-local memory backed by a map.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{Memory, MemoryError};

/// Map-backed memory. Closing clears it; it stays usable afterwards.
#[derive(Debug, Default)]
pub struct InMemory {
    data: RwLock<HashMap<String, String>>,
}

impl InMemory {
    /// Create an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Memory for InMemory {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn memories(&self) -> Result<HashMap<String, String>, MemoryError> {
        Ok(self.data.read().clone())
    }

    async fn close(&self) -> Result<(), MemoryError> {
        self.data.write().clear();
        Ok(())
    }
}

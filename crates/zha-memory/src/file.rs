//! Memory persisted as a JSON object file.
//!
//! The file is read once at open; a missing file means an empty memory.
//! Every mutation rewrites the whole file through `tokio::fs`, which runs
//! the blocking I/O on the runtime's blocking pool. The data lock is held
//! across each rewrite, so the file always reflects the latest mutation.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Memory, MemoryError};

/// File-backed memory. Unusable after [`Memory::close`].
#[derive(Debug)]
pub struct FileMemory {
    path: PathBuf,
    data: Mutex<Option<HashMap<String, String>>>,
}

impl FileMemory {
    /// Open the memory stored at `path`.
    ///
    /// # Errors
    ///
    /// - `MemoryError::Io` - the file exists but cannot be read
    /// - `MemoryError::Decode` - the file is not a JSON object of strings
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "Opening memory file");

        let data = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| MemoryError::Decode {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File does not exist, starting with empty memory");
                HashMap::new()
            }
            Err(source) => return Err(MemoryError::Io { path, source }),
        };

        info!(path = %path.display(), num_memories = data.len(), "Memory loaded");

        Ok(Self {
            path,
            data: Mutex::new(Some(data)),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &HashMap<String, String>) -> Result<(), MemoryError> {
        let bytes = serde_json::to_vec(data).map_err(MemoryError::Encode)?;
        fs::write(&self.path, bytes)
            .await
            .map_err(|source| MemoryError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl Memory for FileMemory {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let guard = self.data.lock().await;
        let data = guard.as_ref().ok_or(MemoryError::Closed)?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(MemoryError::Closed)?;

        debug!(key, "Writing data to memory");
        data.insert(key.to_string(), value.to_string());
        self.persist(data).await
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        let mut guard = self.data.lock().await;
        let data = guard.as_mut().ok_or(MemoryError::Closed)?;

        debug!(key, "Deleting data from memory");
        let existed = data.remove(key).is_some();
        self.persist(data).await?;
        Ok(existed)
    }

    async fn memories(&self) -> Result<HashMap<String, String>, MemoryError> {
        let guard = self.data.lock().await;
        guard.as_ref().cloned().ok_or(MemoryError::Closed)
    }

    async fn close(&self) -> Result<(), MemoryError> {
        let mut guard = self.data.lock().await;
        let data = guard.take().ok_or(MemoryError::Closed)?;

        debug!(path = %self.path.display(), "Shutting down memory");
        self.persist(&data).await
    }
}

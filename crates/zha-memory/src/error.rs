//! Memory errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by memory backends.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The backend was already closed.
    #[error("memory was already shut down")]
    Closed,

    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a JSON object of strings.
    #[error("failed to decode {path} as JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Encoding the data failed.
    #[error("failed to encode data as JSON: {0}")]
    Encode(#[source] serde_json::Error),

    /// The Redis server refused a command or could not be reached.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

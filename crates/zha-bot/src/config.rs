//! Bot configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use zha_bus::{DispatcherConfig, DEFAULT_HANDLER_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use zha_memory::{FileMemory, InMemory, Memory, MemoryError, RedisMemory, DEFAULT_REDIS_KEY};
use zha_slack::retry::{DEFAULT_MAX_TRIES, DEFAULT_MEAN_INTERVAL};
use zha_slack::{RetryPolicy, RetryPolicyError, SupervisorConfig};

/// Errors reading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} and {1} cannot be set together")]
    Conflict(&'static str, &'static str),

    #[error("invalid retry policy: {0}")]
    Retry(#[from] RetryPolicyError),
}

/// Where the bot keeps its memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MemoryBackend {
    /// Process-local map, lost on exit
    #[default]
    InMemory,
    /// JSON object file
    File(PathBuf),
    /// Hash `key` on the Redis server at `url`
    Redis { url: String, key: String },
}

impl MemoryBackend {
    /// Open the configured backend.
    ///
    /// # Errors
    ///
    /// - `MemoryError::Io` / `MemoryError::Decode` - the file cannot be loaded
    /// - `MemoryError::Redis` - the server cannot be reached
    pub async fn open(&self) -> Result<Arc<dyn Memory>, MemoryError> {
        match self {
            Self::InMemory => Ok(Arc::new(InMemory::new())),
            Self::File(path) => {
                let memory = FileMemory::open(path).await?;
                info!(path = %path.display(), "Using file memory");
                Ok(Arc::new(memory))
            }
            Self::Redis { url, key } => {
                let memory = RedisMemory::connect(url, key.as_str()).await?;
                info!(key = %key, "Using redis memory");
                Ok(Arc::new(memory))
            }
        }
    }
}

/// Runtime configuration of the bot binary.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Name the bot logs under
    pub name: String,

    /// Slack bot token; required to run the Slack adapter
    pub slack_token: Option<String>,

    /// Per-handler timeout, `Duration::ZERO` for none
    pub handler_timeout: Duration,

    /// Memory backend
    pub memory: MemoryBackend,

    /// Connection attempts per reconnect cycle
    pub retry_tries: u32,

    /// Interval between connection attempts
    pub retry_interval: Duration,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "zha".to_string(),
            slack_token: None,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            memory: MemoryBackend::InMemory,
            retry_tries: DEFAULT_MAX_TRIES,
            retry_interval: DEFAULT_MEAN_INTERVAL,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl BotConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ZHA_BOT_NAME`: Bot name (default: zha)
    /// - `ZHA_SLACK_TOKEN`: Slack bot token
    /// - `ZHA_HANDLER_TIMEOUT_SECS`: Handler timeout in seconds, 0 for none (default: 10)
    /// - `ZHA_MEMORY_FILE`: Path of the JSON memory file
    /// - `ZHA_REDIS_URL`: Redis server for the memory, e.g. `redis://localhost:6379/0`
    /// - `ZHA_REDIS_KEY`: Hash holding the memory (default: zha-bot)
    /// - `ZHA_RETRY_TRIES`: Connection attempts (default: 10)
    /// - `ZHA_RETRY_INTERVAL_MS`: Interval between attempts in milliseconds (default: 0.5)
    /// - `ZHA_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `ZHA_JSON_LOGS`: Enable JSON logs (default: false)
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - a numeric variable does not parse
    /// - `ConfigError::Conflict` - both a memory file and a Redis URL are set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - a numeric variable does not parse
    /// - `ConfigError::Conflict` - both a memory file and a Redis URL are set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let handler_timeout = match lookup("ZHA_HANDLER_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse("ZHA_HANDLER_TIMEOUT_SECS", &value)?),
            None => defaults.handler_timeout,
        };

        let retry_tries = match lookup("ZHA_RETRY_TRIES") {
            Some(value) => parse("ZHA_RETRY_TRIES", &value)?,
            None => defaults.retry_tries,
        };

        let retry_interval = match lookup("ZHA_RETRY_INTERVAL_MS") {
            Some(value) => {
                let millis: f64 = parse("ZHA_RETRY_INTERVAL_MS", &value)?;
                Duration::try_from_secs_f64(millis / 1000.0).map_err(|_| ConfigError::Invalid {
                    var: "ZHA_RETRY_INTERVAL_MS",
                    value,
                })?
            }
            None => defaults.retry_interval,
        };

        let memory_file = lookup("ZHA_MEMORY_FILE").filter(|path| !path.is_empty());
        let redis_url = lookup("ZHA_REDIS_URL").filter(|url| !url.is_empty());
        let memory = match (memory_file, redis_url) {
            (Some(_), Some(_)) => return Err(ConfigError::Conflict("ZHA_MEMORY_FILE", "ZHA_REDIS_URL")),
            (Some(path), None) => MemoryBackend::File(PathBuf::from(path)),
            (None, Some(url)) => MemoryBackend::Redis {
                url,
                key: lookup("ZHA_REDIS_KEY")
                    .filter(|key| !key.is_empty())
                    .unwrap_or_else(|| DEFAULT_REDIS_KEY.to_string()),
            },
            (None, None) => defaults.memory,
        };

        Ok(Self {
            name: lookup("ZHA_BOT_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.name),

            slack_token: lookup("ZHA_SLACK_TOKEN").filter(|token| !token.is_empty()),

            handler_timeout,

            memory,

            retry_tries,
            retry_interval,

            log_level: lookup("ZHA_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: lookup("ZHA_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.json_logs),
        })
    }

    /// The Slack token, required to connect.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Missing` - `ZHA_SLACK_TOKEN` is not set
    pub fn slack_token(&self) -> Result<&str, ConfigError> {
        self.slack_token
            .as_deref()
            .ok_or(ConfigError::Missing("ZHA_SLACK_TOKEN"))
    }

    /// Dispatcher settings.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handler_timeout: self.handler_timeout,
        }
    }

    /// Supervisor settings.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Retry` - zero retry attempts
    pub fn supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        Ok(SupervisorConfig {
            retry: RetryPolicy::interval(self.retry_tries, self.retry_interval)?,
            ..SupervisorConfig::default()
        })
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

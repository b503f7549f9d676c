//! # Retry Policy
//!
//! Bounded retry with an optional randomized interval between attempts.
//!
//! ```text
//! attempt 1 ──fail──► sleep(d·[1-j, 1+j]) ──► attempt 2 ──fail──► ... ──► attempt N ──fail──► RetryError
//!     │                                           │                           │
//!     └──ok──► Ok(T)                              └──ok──► Ok(T)              └──ok──► Ok(T)
//! ```
//!
//! No sleep follows the final attempt. On exhaustion every failure is
//! returned, in order of occurrence.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Default number of attempts.
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Default mean interval between attempts.
pub const DEFAULT_MEAN_INTERVAL: Duration = Duration::from_micros(500);

/// Invalid retry policy parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryPolicyError {
    /// At least one attempt is required.
    #[error("retry policy needs at least one attempt")]
    ZeroTries,

    /// Jitter factor must lie in `[0, 1)`.
    #[error("jitter factor {0} outside [0, 1)")]
    InvalidJitter(f64),
}

/// Aggregate error holding every failed attempt, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    failures: Vec<E>,
}

impl<E> RetryError<E> {
    /// All recorded failures, in order of occurrence.
    #[must_use]
    pub fn failures(&self) -> &[E] {
        &self.failures
    }

    /// The most recent failure.
    #[must_use]
    pub fn last(&self) -> Option<&E> {
        self.failures.last()
    }

    /// Consume into the list of failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<E> {
        self.failures
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .last()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Parameters of a bounded retry sequence. Stateless between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_tries: u32,
    mean_interval: Duration,
    jitter_factor: f64,
}

impl RetryPolicy {
    /// Fixed interval between attempts.
    ///
    /// # Errors
    ///
    /// - `RetryPolicyError::ZeroTries` - `max_tries` is zero
    pub fn interval(max_tries: u32, interval: Duration) -> Result<Self, RetryPolicyError> {
        Self::backoff(max_tries, interval, 0.0)
    }

    /// Interval drawn uniformly from
    /// `[mean_interval·(1-jitter_factor), mean_interval·(1+jitter_factor)]`.
    ///
    /// # Errors
    ///
    /// - `RetryPolicyError::ZeroTries` - `max_tries` is zero
    /// - `RetryPolicyError::InvalidJitter` - `jitter_factor` outside `[0, 1)`
    pub fn backoff(
        max_tries: u32,
        mean_interval: Duration,
        jitter_factor: f64,
    ) -> Result<Self, RetryPolicyError> {
        if max_tries == 0 {
            return Err(RetryPolicyError::ZeroTries);
        }
        if !(0.0..1.0).contains(&jitter_factor) {
            return Err(RetryPolicyError::InvalidJitter(jitter_factor));
        }
        Ok(Self {
            max_tries,
            mean_interval,
            jitter_factor,
        })
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Mean interval between attempts.
    #[must_use]
    pub fn mean_interval(&self) -> Duration {
        self.mean_interval
    }

    /// Jitter factor in `[0, 1)`.
    #[must_use]
    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    /// Draw the sleep before the next attempt.
    #[must_use]
    pub fn next_interval(&self) -> Duration {
        if self.jitter_factor <= 0.0 || self.mean_interval.is_zero() {
            return self.mean_interval;
        }
        let mean = self.mean_interval.as_secs_f64();
        let delta = mean * self.jitter_factor;
        let secs = rand::thread_rng().gen_range((mean - delta)..=(mean + delta));
        Duration::from_secs_f64(secs)
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// # Errors
    ///
    /// Returns a [`RetryError`] with one entry per failed attempt.
    pub async fn attempt<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut failures = Vec::new();

        for attempt in 1..=self.max_tries {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        attempt,
                        max_tries = self.max_tries,
                        error = %e,
                        "Attempt failed"
                    );
                    failures.push(e);
                }
            }

            if attempt < self.max_tries {
                tokio::time::sleep(self.next_interval()).await;
            }
        }

        Err(RetryError { failures })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            mean_interval: DEFAULT_MEAN_INTERVAL,
            jitter_factor: 0.0,
        }
    }
}

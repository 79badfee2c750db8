//! Bounded retry for assertions against a converging cluster
//!
//! `eventually` re-runs a check until it succeeds or the deadline passes.
//! `consistently` requires a check to keep succeeding for a window; the two
//! compose as `eventually(|| consistently(window, f))` for "becomes stable".

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("timed out after {elapsed:?}, last error: {last}")]
    Timeout { elapsed: Duration, last: String },
}

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, different deadline
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Retry `check` until it returns `Ok` or the timeout elapses
    ///
    /// The check always runs at least once.
    pub async fn eventually<F, Fut, T, E>(&self, mut check: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let last = match check().await {
                Ok(value) => return Ok(value),
                Err(e) => e.to_string(),
            };

            if start.elapsed() >= self.timeout {
                return Err(PollError::Timeout {
                    elapsed: start.elapsed(),
                    last,
                });
            }

            debug!(attempt, error = %last, "Check not satisfied yet, retrying");
            sleep(self.interval).await;
        }
    }

    /// Run `check` every interval for `window`, failing on the first error
    pub async fn consistently<F, Fut, E>(&self, window: Duration, mut check: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let start = Instant::now();

        loop {
            check().await?;
            if start.elapsed() >= window {
                return Ok(());
            }
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;

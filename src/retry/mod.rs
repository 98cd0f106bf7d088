//! Bounded retry with a constant delay.
//!
//! A pure control-flow wrapper: it owns no knowledge of what it wraps.
//! Errors advertise whether a blind retry can help via [`RetryClass`];
//! anything non-retryable propagates immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Classification hook for errors passing through the retry wrapper.
pub trait RetryClass {
    /// Whether another attempt could plausibly succeed. Defaults to true:
    /// unclassified failures are retried up to the attempt cap.
    fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts every attempt including the first and is
    /// clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drive `op` until it succeeds, runs out of attempts, or fails
    /// non-retryably. The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: RetryClass + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        "Attempt {attempt} of {} failed: {err}; retrying in {:?}",
                        self.max_attempts, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

//! Bounded retry with linear backoff for transient store failures.

use crate::error::CacheResult;
use larder_core::config::RetryConfig;
use std::future::Future;
use std::time::Duration;

/// Retry policy applied to individual chunk store calls.
///
/// Only errors reporting themselves transient are retried; a hash
/// mismatch or validation failure fails immediately.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// No retries; every error is final.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt)
    }

    /// Run `op`, retrying transient failures up to the attempt bound.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

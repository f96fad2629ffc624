//! Bounded retry for idempotent chain reads

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, ExchangeResult};

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Policy for plain reads (implementation lookups, address checks)
    pub fn reads(config: &ExchangeConfig) -> Self {
        Self::new(
            config.read_max_retries,
            Duration::from_millis(config.read_retry_delay_ms),
            Duration::from_millis(config.read_retry_max_delay_ms),
        )
    }

    /// Policy for deployment event lookups, where the log may lag the receipt
    pub fn event_queries(config: &ExchangeConfig) -> Self {
        Self::new(
            config.event_query_retries,
            Duration::from_millis(config.read_retry_delay_ms),
            Duration::from_millis(config.read_retry_max_delay_ms),
        )
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Never use for fund-moving submissions.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation, attempts, self.max_attempts, e
                    );
                    if matches!(e, ExchangeError::EventNotFound { .. }) {
                        crate::metrics::record_event_query_retry();
                    }
                    tokio::time::sleep(self.delay(attempts)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reads(&ExchangeConfig::default())
    }
}

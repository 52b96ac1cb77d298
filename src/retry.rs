//! Bounded retries with exponential backoff for outbound HTTP calls.
//!
//! Shared by the embedding providers and the generation client. Only
//! rate limits (429), server errors (5xx) and transport failures are
//! retried; every other failure is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

/// Largest backoff exponent: delays stop growing after `base * 2^5`.
const MAX_BACKOFF_SHIFT: u32 = 5;

pub fn should_retry_status(status: u16) -> bool {
    status == 429 || status >= 500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based): base, 2×base, 4×base, ...
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, retryable: impl Fn(&E) -> bool, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::warn!(error = %e, attempt, ?delay, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

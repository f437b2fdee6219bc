//! Retry helper for transient LLM failures
//!
//! Explicit result values at every suspension point: transient errors are
//! retried with exponential backoff and jitter, permanent errors surface
//! immediately, and nothing is swallowed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::LlmError;

/// Backoff policy for retryable LLM calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay, doubled per retry
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (0-based), with up to 20% jitter
    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << retry.min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::rng().random_range(0.0..0.2);
        capped.mul_f64(1.0 + jitter)
    }
}

/// Run an LLM call, retrying transient failures per the policy
///
/// Rate-limit errors use the server-provided delay when it exceeds the
/// backoff. The final error is returned unchanged when attempts run out.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, op: &str, mut call: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let backoff = policy.delay_for(attempt);
                let delay = err.retry_after().map(|ra| ra.max(backoff)).unwrap_or(backoff);
                warn!(%op, attempt = attempt + 1, error = %err, ?delay, "transient LLM failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(%op, attempt = attempt + 1, error = %err, "LLM call failed");
                return Err(err);
            }
        }
    }
}

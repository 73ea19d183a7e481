//! Retry policy for event processing.
//!
//! Exponential backoff with a hard cap. Only errors marked retriable get
//! another attempt; validation and signature failures fail fast.

use std::future::Future;
use std::time::Duration;

use crate::config::WebhookConfig;
use crate::errors::{SearchError, SearchResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt:
    /// base * 2^attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&WebhookConfig> for RetryPolicy {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Run `operation` under the policy. Returns the first success, the
/// first non-retriable error, or the last error once attempts are
/// exhausted.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut operation: F,
) -> SearchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SearchResult<T>>,
{
    let mut last_error: Option<SearchError> = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // Unreachable with max_attempts >= 1, but the loop shape requires it.
    Err(last_error
        .unwrap_or_else(|| SearchError::config(&format!("retry policy for '{}' ran zero attempts", label))))
}

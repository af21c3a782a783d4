//! Bounded retry with exponential backoff for transient I/O.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RunOptions;
use crate::error::{MigrateError, Result};

/// Retry budget and per-operation timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Base backoff delay, doubled per attempt.
    pub base_delay: Duration,
    /// Per-operation timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Build the policy from run options.
    pub fn from_options(options: &RunOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            base_delay: Duration::from_millis(options.retry_backoff_ms),
            timeout: Duration::from_secs(options.io_timeout_secs),
        }
    }

    fn delay(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16) as u32)
    }
}

/// Run `op` under the policy's timeout, retrying transient failures with
/// exponential backoff. Non-transient errors propagate immediately.
///
/// Only safe for idempotent operations: a chunk read (pure), or a chunk
/// write whose transaction rolled back before the retry.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::transient(format!(
                "{} timed out after {:?}",
                label, policy.timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                warn!(
                    "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, policy.max_retries, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

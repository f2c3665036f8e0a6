//! Retry with exponential backoff for upstream calls.
//!
//! One policy-driven loop shared by lesson generation and speech synthesis.
//! Whether an error is worth retrying is decided by a caller-supplied
//! classifier, so the backoff algorithm knows nothing about HTTP shapes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

/// Backoff parameters for one kind of upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub max_jitter: Duration,
    /// Cap applied after jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            max_jitter: Duration::from_millis(200),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), before jitter.
    fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Delay after the given failed attempt, jittered and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = self.max_jitter.mul_f64(rand::random::<f64>());
        (self.base_backoff(attempt) + jitter).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, the error is classified as
    /// permanent, or attempts run out. The last error is returned as-is.
    pub async fn run<T, E, Op, Fut, C>(
        &self,
        label: &str,
        classify: C,
        mut operation: Op,
    ) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt < max_attempts && classify(&e) {
                        let delay = self.backoff(attempt);
                        warn!(
                            label,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "upstream call failed, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    error!(label, attempt, max_attempts, error = %e, "upstream call failed");
                    return Err(e);
                }
            }
        }
    }
}

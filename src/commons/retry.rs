use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Exponential backoff with a ceiling.
///
/// Attempt `n` (1-based) that fails waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`. With `jitter` the wait is drawn from `[delay/2, delay]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let ms = delay.as_millis() as u64;
        let jittered = rand::thread_rng().gen_range(ms / 2..=ms);
        Duration::from_millis(jittered)
    }

    /// Run `call` until it succeeds or `max_attempts` is reached.
    ///
    /// Invalid input and a closed limiter are returned as-is. Everything else
    /// is retried and, once the budget is spent, wrapped in
    /// [`ApiError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, op: &str, target: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, target, attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err @ (ApiError::InvalidInput(_) | ApiError::LimiterClosed)) => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(ApiError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let wait = self.backoff(attempt);
                    warn!(
                        op,
                        target,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "request failed; backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

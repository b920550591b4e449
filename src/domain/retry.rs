//! Exponential backoff shared by connection establishment and publishing.
//!
//! The policy allows at most `max_attempts` calls of the operation. After the
//! k-th failed attempt (1-based) it waits `base × 2^k` before trying again,
//! so with the default one-second base the waits are 2s, 4s, 8s, ...
//! Nothing is awaited after the final attempt.
//!
//! ```
//! use std::time::Duration;
//! use integration_event_bus::domain::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(5);
//! assert_eq!(policy.delay_after(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_after(3), Duration::from_secs(8));
//! ```

use std::future::Future;
use std::time::Duration;

/// Default number of attempts for connect and publish.
pub const DEFAULT_RETRY_COUNT: u32 = 5;

/// Retry schedule with exponentially growing delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Unit multiplied by `2^attempt` to obtain each delay.
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COUNT)
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and a one-second base.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: Duration::from_secs(1),
        }
    }

    /// Overrides the delay unit.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Number of attempts actually made; a zero budget still tries once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// `on_retry` is called with the error, the failed attempt number and the
    /// delay about to be awaited. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
        mut on_retry: impl FnMut(&E, u32, Duration),
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    on_retry(&e, attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

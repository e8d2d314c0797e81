//! Bounded retry with linear backoff.
//!
//! One worker invocation retries a gateway call up to `max_attempts` times,
//! sleeping `base_delay * attempt` between tries. Permanent errors (explicit
//! provider rejections) short-circuit immediately - retrying an identical
//! rejected call cannot succeed.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors that can distinguish a permanent rejection from a transient fault.
pub trait RetryableError {
    fn is_permanent(&self) -> bool;
}

impl RetryableError for crate::ledger::GatewayError {
    fn is_permanent(&self) -> bool {
        crate::ledger::GatewayError::is_permanent(self)
    }
}

impl RetryableError for crate::mobile_money::MobileMoneyError {
    fn is_permanent(&self) -> bool {
        crate::mobile_money::MobileMoneyError::is_permanent(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after attempt `attempt` (1-based): 200ms, 400ms, 600ms, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Returns the last error on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, op_name: &'static str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_permanent() => {
                    warn!(op = op_name, attempt, error = %e, "permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(op = op_name, attempt, error = %e, "transient failure, will retry");
                    tokio::time::sleep(self.delay_after(attempt)).await;
                }
                Err(e) => {
                    warn!(op = op_name, attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
            }
        }
    }
}

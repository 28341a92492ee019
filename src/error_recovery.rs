//! Retry policy for transient sensor failures.
//
// A capture that times out or fails on the bus is retried in place before the
// scan point is given up. Anything that is not transient is returned to the
// caller immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::InspectError;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // One retry, then skip the point.
        Self {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, InspectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InspectError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    debug!(attempt, max_attempts = attempts, error = %err, "Retrying transient failure");
                    attempt += 1;
                    if !self.backoff_delay.is_zero() {
                        sleep(self.backoff_delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

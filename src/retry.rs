//! Retry with exponential backoff for remote calls
//!
//! Every network operation in this crate goes through [`RetryPolicy::run`].
//! Backoff sleeps race against a [`CancellationToken`] so an orchestrator
//! deadline can abort an in-flight retry loop.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{LifecycleError, Result};

/// Default total attempts (one call plus three retries).
pub const DEFAULT_ATTEMPTS: u32 = 4;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default multiplier applied to the delay after each failed attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Retry configuration shared by provisioning, deployment and transaction calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor between delays
    pub backoff_factor: f64,
    /// Decides whether an error is worth another attempt
    pub retryable: fn(&LifecycleError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retryable: LifecycleError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_classifier(mut self, retryable: fn(&LifecycleError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(LifecycleError::Cancelled {
                    operation: operation.to_string(),
                });
            }

            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !(self.retryable)(&err) {
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }

            let delay = self.backoff_for(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(LifecycleError::Cancelled {
                        operation: operation.to_string(),
                    });
                }
            }
        }
    }
}

//! Bounded exponential-backoff retry around a single provider attempt.

use crate::classify::ErrorClassifier;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Backoff before retry `n` is `2^n * unit`, capped at `max_delay`.
    pub unit: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let unit_ms = u64::try_from(self.unit.as_millis()).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(unit_ms)
            .max_delay(self.max_delay)
    }
}

/// Per-invocation bookkeeping; never shared between concurrent calls.
struct RetryState {
    attempt: u32,
    backoff: ExponentialBackoff,
    current_backoff: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            backoff: policy.backoff(),
            current_backoff: Duration::ZERO,
        }
    }

    fn advance_backoff(&mut self, cap: Duration) -> Duration {
        self.current_backoff = self.backoff.next().unwrap_or(cap);
        self.current_backoff
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: ErrorClassifier,
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    ///
    /// Terminal failures are returned unchanged on the attempt they occur.
    /// Exhaustion wraps the last error in [`Error::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState::new(&self.policy);

        loop {
            state.attempt += 1;
            debug!("[{}] attempt {}/{}", label, state.attempt, self.policy.max_attempts);

            let error = match operation().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        info!("[{}] succeeded after {} attempts", label, state.attempt);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = self.classifier.classify(&error);
            if !kind.is_retryable() {
                warn!(
                    "[{}] terminal {} error on attempt {}, not retrying: {}",
                    label, kind, state.attempt, error
                );
                return Err(error);
            }

            if state.attempt >= self.policy.max_attempts {
                error!(
                    "[{}] giving up after {} attempts ({}): {}",
                    label, state.attempt, kind, error
                );
                return Err(Error::RetriesExhausted {
                    attempts: state.attempt,
                    source: Box::new(error),
                });
            }

            let wait = state.advance_backoff(self.policy.max_delay);
            warn!(
                "[{}] attempt {}/{} failed with {} error, retrying in {:?}: {}",
                label, state.attempt, self.policy.max_attempts, kind, wait, error
            );
            tokio::time::sleep(wait).await;
        }
    }
}

//! Retry with Exponential Backoff
//! Handles transient failures with configurable retry policies

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{ResilienceError, Result};
use crate::observability::{NoopObserver, ResilienceObserver, RetryOutcome};

/// Decides whether a failed attempt is worth repeating.
pub type ShouldRetry = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_retries: u32,
    #[serde(with = "crate::config::millis")]
    pub initial_backoff: Duration,
    #[serde(with = "crate::config::millis")]
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

/// `backoff` plus a uniform draw from `[0, backoff)`, capped at `max_backoff`.
pub(crate) fn jittered_wait(backoff: Duration, max_backoff: Duration) -> Duration {
    let bound = backoff.as_nanos().min(u64::MAX as u128) as u64;
    let jitter = if bound == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    };
    backoff.saturating_add(jitter).min(max_backoff)
}

pub(crate) fn next_backoff(backoff: Duration, factor: f64, max_backoff: Duration) -> Duration {
    let nanos = backoff.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos < 0.0 {
        return max_backoff;
    }
    // float-to-int casts saturate
    Duration::from_nanos(nanos as u64).min(max_backoff)
}

#[derive(Clone)]
pub struct RetryPolicy {
    name: String,
    config: RetryConfig,
    should_retry: ShouldRetry,
    observer: Arc<dyn ResilienceObserver>,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            should_retry: Arc::new(ResilienceError::is_retryable),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `ctx` ends.
    ///
    /// Cancellation during a backoff wait returns at once. A cancellation error
    /// coming out of the operation is returned as-is without asking the
    /// predicate.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            if let Some(err) = ctx.err() {
                self.observer.retry_outcome(&self.name, RetryOutcome::Canceled);
                return Err(err);
            }

            attempt += 1;
            let err = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            operation = %self.name,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    self.observer.retry_outcome(&self.name, RetryOutcome::Success);
                    return Ok(result);
                }
                Err(err) => err,
            };

            if err.is_cancellation() {
                self.observer.retry_outcome(&self.name, RetryOutcome::Canceled);
                return Err(err);
            }

            if !(self.should_retry)(&err) {
                warn!(operation = %self.name, error = %err, "Non-retryable error occurred");
                self.observer.retry_outcome(&self.name, RetryOutcome::NonRetryable);
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(
                    operation = %self.name,
                    attempt = attempt,
                    error = %err,
                    "Operation failed after all retries"
                );
                self.observer.retry_outcome(&self.name, RetryOutcome::Exhausted);
                return Err(ResilienceError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let wait = jittered_wait(backoff, self.config.max_backoff);
            warn!(
                operation = %self.name,
                attempt = attempt,
                max_attempts = max_attempts,
                error = %err,
                delay_ms = wait.as_millis() as u64,
                "Operation failed, retrying"
            );
            self.observer.retry_attempt(&self.name, attempt, wait);

            tokio::select! {
                biased;
                err = ctx.done() => {
                    self.observer.retry_outcome(&self.name, RetryOutcome::Canceled);
                    return Err(err);
                }
                _ = sleep(wait) => {}
            }

            backoff = next_backoff(backoff, self.config.backoff_factor, self.config.max_backoff);
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jittered_wait_bounds() {
        let backoff = Duration::from_millis(100);
        for _ in 0..200 {
            let wait = jittered_wait(backoff, Duration::from_secs(1));
            assert!(wait >= backoff);
            assert!(wait < backoff * 2);
        }
    }

    #[test]
    fn test_jittered_wait_is_capped() {
        let wait = jittered_wait(Duration::from_millis(800), Duration::from_secs(1));
        assert!(wait <= Duration::from_secs(1));
        assert_eq!(jittered_wait(Duration::ZERO, Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_backoff_growth() {
        let max = Duration::from_secs(1);
        let b1 = next_backoff(Duration::from_millis(100), 2.0, max);
        assert_eq!(b1, Duration::from_millis(200));

        let b2 = next_backoff(Duration::from_millis(600), 2.0, max);
        assert_eq!(b2, max);

        let huge = next_backoff(Duration::from_secs(u64::MAX / 2), 4.0, max);
        assert_eq!(huge, max);
    }
}

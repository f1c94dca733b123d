//! Resilience Events
//! Narrow hooks the primitives report through; sinks decide what to do with them

use std::time::Duration;

use crate::resilience::CircuitState;

/// How a retry loop finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Success,
    NonRetryable,
    Exhausted,
    Canceled,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Success => "success",
            RetryOutcome::NonRetryable => "non_retryable",
            RetryOutcome::Exhausted => "exhausted",
            RetryOutcome::Canceled => "canceled",
        }
    }
}

/// Event sink for metrics or audit. Called synchronously on the hot path, so
/// implementations must not block.
pub trait ResilienceObserver: Send + Sync {
    fn permit_acquired(&self, _bulkhead: &str, _occupied: usize, _capacity: usize) {}

    fn permit_denied(&self, _bulkhead: &str, _occupied: usize, _capacity: usize) {}

    /// `time_in_from` is how long the breaker stayed in `from`.
    fn state_transition(
        &self,
        _breaker: &str,
        _from: CircuitState,
        _to: CircuitState,
        _time_in_from: Duration,
    ) {
    }

    fn rate_limit_exceeded(&self, _key: &str) {}

    fn rate_limit_latency(&self, _key: &str, _elapsed: Duration) {}

    fn retry_attempt(&self, _operation: &str, _attempt: u32, _wait: Duration) {}

    fn retry_outcome(&self, _operation: &str, _outcome: RetryOutcome) {}
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

/// Circuit breaker callbacks. Invoked on the task that caused the event,
/// after the breaker's own lock has been released.
pub trait CircuitBreakerListener: Send + Sync {
    fn on_state_change(&self, _name: &str, _from: CircuitState, _to: CircuitState) {}

    fn on_open(&self, _name: &str) {}

    fn on_close(&self, _name: &str) {}

    fn on_success(&self, _name: &str) {}

    fn on_failure(&self, _name: &str) {}
}

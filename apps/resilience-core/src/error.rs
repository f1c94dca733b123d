//! Resilience Errors
//! One error type shared by every primitive and the orchestrator

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResilienceError>;

#[derive(Debug, Error)]
pub enum ResilienceError {
    /// No bulkhead permit became free within the configured timeout.
    #[error("bulkhead '{name}' timed out after {timeout:?} waiting for a permit")]
    AdmissionTimeout { name: String, timeout: Duration },

    /// The bulkhead permit pool is closed.
    #[error("bulkhead '{name}' denied admission: capacity unavailable")]
    AdmissionDenied { name: String },

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Half-open breaker already admitted its full trial allowance.
    #[error("circuit breaker '{name}' is half-open and admits no more requests")]
    TooManyRequests { name: String },

    /// The token would not become available before the context deadline.
    #[error("rate limit exceeded for '{key}'")]
    RateLimitExceeded { key: String },

    #[error("rate limiter not initialized for '{key}'")]
    LimiterNotInitialized { key: String },

    #[error("operation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ResilienceError>,
    },

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid resilience configuration: {0}")]
    InvalidConfig(String),

    #[error("operation panicked: {0}")]
    Panicked(String),

    /// Failure reported by the protected operation itself.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl ResilienceError {
    /// Wrap any caller error as an operation failure.
    pub fn operation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Operation(anyhow::Error::new(err))
    }

    /// Build an operation failure from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Operation(anyhow::Error::msg(message))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// True when a layer refused the call without running the operation.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::AdmissionTimeout { .. }
                | Self::AdmissionDenied { .. }
                | Self::CircuitOpen { .. }
                | Self::TooManyRequests { .. }
                | Self::RateLimitExceeded { .. }
        )
    }

    /// Unwraps `RetriesExhausted` down to the error of the final attempt.
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Default retry classification used when no predicate is supplied.
    /// `RateLimitExceeded` is final because the token cannot arrive before
    /// the same context's deadline.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Canceled
                | Self::DeadlineExceeded
                | Self::InvalidConfig(_)
                | Self::LimiterNotInitialized { .. }
                | Self::RateLimitExceeded { .. }
                | Self::RetriesExhausted { .. }
        )
    }
}

//! Resilience Core - Fault Tolerance for Service-to-Service Calls
//!
//! Four admission and failure-control primitives, each safe for concurrent
//! use, and an orchestrator that runs them as one pipeline per operation:
//!
//! - [`RateLimiter`]: token buckets keyed by operation name
//! - [`Bulkhead`]: bounded concurrency with a wait timeout
//! - [`CircuitBreaker`]: closed/open/half-open failure-rate state machine
//! - [`RetryPolicy`]: bounded exponential backoff with jitter
//! - [`ResilienceOrchestrator`]: retry over rate limiter → bulkhead → breaker
//!
//! Every wait is tied to a [`CallContext`]; cancellation is cooperative and
//! always wins over a timeout expiring at the same moment.
//!
//! ```no_run
//! use resilience_core::{CallContext, NoopObserver, RateLimiter, ResilienceConfig, ResilienceOrchestrator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> resilience_core::Result<()> {
//! let limiters = Arc::new(RateLimiter::new());
//! let orchestrator = ResilienceOrchestrator::new(
//!     "inventory",
//!     &ResilienceConfig::default(),
//!     limiters,
//!     Arc::new(NoopObserver),
//! )
//! .await?;
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(2));
//! let stock = orchestrator.execute(&ctx, || async { Ok(42u32) }).await?;
//! assert_eq!(stock, 42);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod resilience;

pub use config::ResilienceConfig;
pub use context::CallContext;
pub use error::{ResilienceError, Result};
pub use observability::{
    CircuitBreakerListener, NoopObserver, PrometheusObserver, ResilienceObserver, RetryOutcome,
};
pub use resilience::{
    fallback, Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, Counts, Fallback, RateLimiter, RateLimiterConfig, ResilienceOrchestrator,
    RetryConfig, RetryPolicy, ShouldRetry,
};

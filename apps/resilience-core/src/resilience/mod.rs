//! Resilience Module - Bulkheads, Circuit Breakers, Rate Limiters, Retries
//! Fault tolerance patterns for calls into downstream dependencies

mod bulkhead;
mod circuit_breaker;
mod orchestrator;
mod rate_limiter;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts,
};
pub use orchestrator::ResilienceOrchestrator;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryPolicy, ShouldRetry};

use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::context::CallContext;
use crate::error::{ResilienceError, Result};

/// Alternative result used when a layer refuses admission. Shared so the same
/// fallback can serve every retry attempt.
pub type Fallback<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Build a [`Fallback`] from an async closure.
pub fn fallback<T, F, Fut>(f: F) -> Fallback<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Run `fut` to completion, turning a panic into an error.
pub(crate) async fn catch_panic<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ResilienceError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wait for a spawned operation or the context, whichever finishes first.
/// The task is detached, not aborted, when the context wins.
pub(crate) async fn race_with_context<T>(ctx: &CallContext, handle: JoinHandle<Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        joined = handle => match joined {
            Ok(result) => result,
            Err(e) => Err(ResilienceError::Panicked(e.to_string())),
        },
    }
}

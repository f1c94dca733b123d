//! Resilience Orchestrator
//! Composes rate limiting, bulkhead admission and circuit breaking under one
//! retry loop for a single named operation
//!
//! Every attempt goes through the whole chain, so retries spend rate budget
//! and bulkhead capacity just like first attempts do:
//!
//! ```text
//! retry ─┬─> rate limiter ─> bulkhead ─> circuit breaker ─> operation
//!        └── backoff, then again
//! ```

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use super::{Bulkhead, CircuitBreaker, Fallback, RateLimiter, RetryPolicy};
use crate::config::ResilienceConfig;
use crate::context::CallContext;
use crate::error::{ResilienceError, Result};
use crate::observability::{CircuitBreakerListener, ResilienceObserver};

pub struct ResilienceOrchestrator {
    name: String,
    rate_limiter: Arc<RateLimiter>,
    bulkhead: Arc<Bulkhead>,
    circuit_breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilienceOrchestrator {
    /// Build the pipeline for `name` and register its rate-limiter bucket in
    /// the shared `rate_limiter` registry under the same key.
    pub async fn new(
        name: impl Into<String>,
        config: &ResilienceConfig,
        rate_limiter: Arc<RateLimiter>,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();

        rate_limiter.from_config(name.clone(), &config.rate_limiter).await;

        let bulkhead = Bulkhead::new(name.clone(), &config.bulkhead)?
            .with_observer(Arc::clone(&observer));
        let circuit_breaker = CircuitBreaker::new(name.clone(), config.circuit_breaker.clone())
            .with_observer(Arc::clone(&observer));
        let retry = RetryPolicy::new(name.clone(), config.retry.clone()).with_observer(observer);

        info!(name = %name, "Resilience orchestrator initialized");

        Ok(Self {
            name,
            rate_limiter,
            bulkhead: Arc::new(bulkhead),
            circuit_breaker,
            retry,
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn CircuitBreakerListener>) -> Self {
        self.circuit_breaker = self.circuit_breaker.with_listener(listener);
        self
    }

    pub fn with_should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.retry = self.retry.with_should_retry(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_with_fallback(ctx, operation, None).await
    }

    /// Like [`execute`](Self::execute), with `fallback` answering for the
    /// bulkhead and circuit breaker whenever either refuses admission.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: F,
        fallback: Option<Fallback<T>>,
    ) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = Arc::new(operation);
        self.retry
            .execute(ctx, || self.attempt(ctx, Arc::clone(&operation), fallback.clone()))
            .await
    }

    async fn attempt<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: Arc<F>,
        fallback: Option<Fallback<T>>,
    ) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.rate_limiter.wait(ctx, &self.name).await?;

        // The bulkhead already races `ctx`. The inner call waits for the
        // operation itself so the permit is held until it really finishes.
        let breaker = self.circuit_breaker.clone();
        let breaker_ctx = CallContext::new();
        let breaker_fallback = fallback.clone();

        self.bulkhead
            .execute(
                ctx,
                move || async move {
                    breaker
                        .execute(&breaker_ctx, move || (*operation)(), breaker_fallback)
                        .await
                },
                fallback,
            )
            .await
    }

    /// Shut down the components that hold resources. Only the circuit breaker
    /// has a shutdown hook; the others are released with the orchestrator.
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<()> {
        info!(name = %self.name, "Shutting down resilience orchestrator");

        if let Err(e) = self.circuit_breaker.shutdown(ctx).await {
            error!(name = %self.name, error = %e, "Failed to shutdown circuit breaker");
            return Err(e);
        }

        info!(name = %self.name, "Resilience orchestrator shut down");
        Ok(())
    }
}

impl std::fmt::Debug for ResilienceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceOrchestrator")
            .field("name", &self.name)
            .field("bulkhead", &self.bulkhead)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry", &self.retry)
            .finish()
    }
}

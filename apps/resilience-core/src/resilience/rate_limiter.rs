//! Rate Limiter
//! Token buckets keyed by operation or service name

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{ResilienceError, Result};
use crate::observability::{NoopObserver, ResilienceObserver};

// Absorbs float rounding between the computed delay and the refill.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub rps: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rps: 100,
            burst: 100,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A simple token bucket, full on creation.
#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: burst as f64,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if self.rate > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        }
        state.last_refill = now;
    }

    /// Takes one token, or reports how long until one is available.
    /// `Err(None)` means no token will ever arrive: the bucket cannot hold
    /// one, or it never refills.
    async fn try_acquire(&self) -> std::result::Result<(), Option<Duration>> {
        if self.burst < 1.0 {
            return Err(None);
        }

        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());

        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return Ok(());
        }

        if self.rate > 0.0 {
            let missing = 1.0 - state.tokens;
            Err(Some(Duration::from_secs_f64(missing / self.rate)))
        } else {
            Err(None)
        }
    }

    async fn tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        state.tokens
    }
}

/// Registry of token buckets. Owned by whoever wires the service together;
/// there is no process-wide instance.
pub struct RateLimiter {
    limiters: RwLock<HashMap<String, Arc<TokenBucket>>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register the bucket for `key`, replacing any existing one. A zero
    /// `burst` makes every `wait` fail with `RateLimitExceeded`.
    pub async fn new_limiter(&self, key: impl Into<String>, rate: f64, burst: u32) {
        let key = key.into();
        let bucket = Arc::new(TokenBucket::new(rate, burst));
        self.limiters.write().await.insert(key.clone(), bucket);
        info!(key = %key, rps = rate, burst = burst, "Rate limiter initialized");
    }

    pub async fn from_config(&self, key: impl Into<String>, config: &RateLimiterConfig) {
        self.new_limiter(key, config.rps as f64, config.burst).await;
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.limiters.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.limiters.write().await.remove(key).is_some()
    }

    pub async fn available_tokens(&self, key: &str) -> Option<f64> {
        let bucket = self.limiters.read().await.get(key).cloned()?;
        Some(bucket.tokens().await)
    }

    async fn bucket(&self, key: &str) -> Result<Arc<TokenBucket>> {
        self.limiters
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ResilienceError::LimiterNotInitialized {
                key: key.to_string(),
            })
    }

    /// Block until a token for `key` is available.
    ///
    /// Returns the context error if `ctx` ends first, and `RateLimitExceeded`
    /// straight away when the next token would arrive after the context
    /// deadline or would never arrive at all. In every failure case no token
    /// is consumed.
    pub async fn wait(&self, ctx: &CallContext, key: &str) -> Result<()> {
        let bucket = self.bucket(key).await?;

        loop {
            if let Some(err) = ctx.err() {
                return Err(self.exceeded(key, err));
            }

            let delay = match bucket.try_acquire().await {
                Ok(()) => return Ok(()),
                Err(Some(delay)) => delay,
                Err(None) => return Err(self.exceeded(key, limit_error(key))),
            };

            if matches!(ctx.remaining(), Some(remaining) if delay > remaining) {
                return Err(self.exceeded(key, limit_error(key)));
            }

            debug!(key = %key, wait_ms = delay.as_millis() as u64, "Waiting for rate limit token");
            tokio::select! {
                biased;
                err = ctx.done() => return Err(self.exceeded(key, err)),
                _ = sleep(delay) => {}
            }
        }
    }

    fn exceeded(&self, key: &str, err: ResilienceError) -> ResilienceError {
        warn!(key = %key, error = %err, "Rate limit exceeded");
        self.observer.rate_limit_exceeded(key);
        err
    }

    /// Wait for a token, then run `f`.
    pub async fn execute_with_rate_limiting<T, F, Fut>(
        &self,
        ctx: &CallContext,
        key: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        self.wait(ctx, key).await?;
        let result = f().await;
        self.observer.rate_limit_latency(key, start.elapsed());
        result
    }
}

fn limit_error(key: &str) -> ResilienceError {
    ResilienceError::RateLimitExceeded {
        key: key.to_string(),
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

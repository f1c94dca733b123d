//! Circuit Breaker Implementation
//! Prevents cascading failures by failing fast when a dependency is unhealthy
//!
//! Counting happens per generation. A generation starts on every state change
//! and on each Closed-state interval boundary; outcomes that arrive for an
//! older generation are discarded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{catch_panic, race_with_context, Fallback};
use crate::context::CallContext;
use crate::error::{ResilienceError, Result};
use crate::observability::{CircuitBreakerListener, NoopObserver, ResilienceObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    /// Gauge encoding: 0 closed, 0.5 half-open, 1 open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Requests admitted while half-open, and the number of successes
    /// needed to close again.
    pub max_requests: u32,
    /// Closed-state count reset period. Zero disables the reset.
    #[serde(with = "crate::config::millis")]
    pub interval: Duration,
    /// Time spent open before admitting trial requests.
    #[serde(with = "crate::config::millis")]
    pub timeout: Duration,
    pub consecutive_failures: u32,
    /// Trips once `total_failures / requests` rises above this.
    pub failure_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            consecutive_failures: 5,
            failure_rate_threshold: 0.5,
        }
    }
}

impl CircuitBreakerConfig {
    fn half_open_allowance(&self) -> u32 {
        self.max_requests.max(1)
    }

    /// Closed→Open decision for the counts of the current interval.
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.consecutive_failures >= self.consecutive_failures {
            return true;
        }
        counts.failure_rate() > self.failure_rate_threshold
    }
}

/// Request outcomes within one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }

    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    time_in_from: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
    entered_at: Instant,
}

impl BreakerState {
    fn new(now: Instant, config: &CircuitBreakerConfig) -> Self {
        let mut state = Self {
            state: CircuitState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
            entered_at: now,
        };
        state.new_generation(now, config);
        state
    }

    /// Applies time-driven changes (interval reset, open timeout) and returns
    /// the effective state.
    fn current(
        &mut self,
        now: Instant,
        config: &CircuitBreakerConfig,
        transitions: &mut Vec<Transition>,
    ) -> (CircuitState, u64) {
        match (self.state, self.expiry) {
            (CircuitState::Closed, Some(expiry)) if expiry <= now => {
                self.new_generation(now, config);
            }
            (CircuitState::Open, Some(expiry)) if expiry <= now => {
                self.set_state(CircuitState::HalfOpen, now, config, transitions);
            }
            _ => {}
        }
        (self.state, self.generation)
    }

    fn set_state(
        &mut self,
        to: CircuitState,
        now: Instant,
        config: &CircuitBreakerConfig,
        transitions: &mut Vec<Transition>,
    ) {
        if self.state == to {
            return;
        }
        let from = self.state;
        let time_in_from = now.saturating_duration_since(self.entered_at);
        self.state = to;
        self.entered_at = now;
        self.new_generation(now, config);
        transitions.push(Transition {
            from,
            to,
            time_in_from,
        });
    }

    fn new_generation(&mut self, now: Instant, config: &CircuitBreakerConfig) {
        self.generation = self.generation.wrapping_add(1);
        self.counts.clear();
        self.expiry = match self.state {
            CircuitState::Closed if config.interval.is_zero() => None,
            CircuitState::Closed => Some(now + config.interval),
            CircuitState::Open => Some(now + config.timeout),
            CircuitState::HalfOpen => None,
        };
    }

    /// Admission decision. On success returns the generation the outcome must
    /// be reported against.
    fn before_request(
        &mut self,
        now: Instant,
        config: &CircuitBreakerConfig,
        transitions: &mut Vec<Transition>,
    ) -> std::result::Result<u64, CircuitState> {
        let (state, generation) = self.current(now, config, transitions);
        match state {
            CircuitState::Open => return Err(state),
            CircuitState::HalfOpen if self.counts.requests >= config.half_open_allowance() => {
                return Err(state)
            }
            _ => {}
        }
        self.counts.on_request();
        Ok(generation)
    }

    fn after_request(
        &mut self,
        before: u64,
        success: bool,
        now: Instant,
        config: &CircuitBreakerConfig,
        transitions: &mut Vec<Transition>,
    ) -> bool {
        let (state, generation) = self.current(now, config, transitions);
        if generation != before {
            return false;
        }

        if success {
            self.counts.on_success();
            if state == CircuitState::HalfOpen
                && self.counts.consecutive_successes >= config.half_open_allowance()
            {
                self.set_state(CircuitState::Closed, now, config, transitions);
            }
        } else {
            match state {
                CircuitState::Closed => {
                    self.counts.on_failure();
                    if config.ready_to_trip(&self.counts) {
                        self.set_state(CircuitState::Open, now, config, transitions);
                    }
                }
                CircuitState::HalfOpen => {
                    self.set_state(CircuitState::Open, now, config, transitions);
                }
                CircuitState::Open => {}
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
    listeners: Arc<Vec<Arc<dyn CircuitBreakerListener>>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        info!(
            name = %name,
            max_requests = config.max_requests,
            consecutive_failures = config.consecutive_failures,
            failure_rate_threshold = config.failure_rate_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        let state = BreakerState::new(Instant::now(), &config);
        Self {
            name: name.into(),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            listeners: Arc::new(Vec::new()),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CircuitBreakerListener>) -> Self {
        Arc::make_mut(&mut self.listeners).push(listener);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub async fn state(&self) -> CircuitState {
        let mut transitions = Vec::new();
        let state = {
            let mut guard = self.state.lock().await;
            guard.current(Instant::now(), &self.config, &mut transitions).0
        };
        self.notify(&transitions);
        state
    }

    pub async fn counts(&self) -> Counts {
        self.state.lock().await.counts
    }

    /// Run `operation` under breaker protection.
    ///
    /// While open (or half-open with its allowance used up) the operation is
    /// never created; `fallback` runs instead. Admitted operations run on
    /// their own task and report their outcome to the breaker when they
    /// finish, even if `ctx` ended the wait earlier.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: F,
        fallback: Option<Fallback<T>>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let generation = match self.before_request().await {
            Ok(generation) => generation,
            Err(err) => {
                return match fallback {
                    Some(fallback) => {
                        warn!(name = %self.name, error = %err, "Circuit breaker refused call, executing fallback");
                        fallback().await
                    }
                    None => {
                        warn!(name = %self.name, error = %err, "Circuit breaker refused call");
                        Err(err)
                    }
                };
            }
        };

        let fut = operation();
        let breaker = self.clone();
        let handle = tokio::spawn(async move {
            let result = catch_panic(fut).await;
            breaker.after_request(generation, result.is_ok()).await;
            result
        });

        race_with_context(ctx, handle).await
    }

    async fn before_request(&self) -> Result<u64> {
        let mut transitions = Vec::new();
        let admitted = {
            let mut guard = self.state.lock().await;
            guard.before_request(Instant::now(), &self.config, &mut transitions)
        };
        self.notify(&transitions);

        admitted.map_err(|state| match state {
            CircuitState::HalfOpen => ResilienceError::TooManyRequests {
                name: self.name.to_string(),
            },
            _ => ResilienceError::CircuitOpen {
                name: self.name.to_string(),
            },
        })
    }

    async fn after_request(&self, generation: u64, success: bool) {
        let mut transitions = Vec::new();
        let counted = {
            let mut guard = self.state.lock().await;
            guard.after_request(generation, success, Instant::now(), &self.config, &mut transitions)
        };

        if counted {
            for listener in self.listeners.iter() {
                if success {
                    listener.on_success(&self.name);
                } else {
                    listener.on_failure(&self.name);
                }
            }
        } else {
            debug!(name = %self.name, generation, "Discarding outcome from a previous generation");
        }

        self.notify(&transitions);
    }

    fn notify(&self, transitions: &[Transition]) {
        for t in transitions {
            match t.to {
                CircuitState::Open => warn!(
                    name = %self.name,
                    from = %t.from,
                    to = %t.to,
                    "Circuit breaker opened"
                ),
                _ => info!(
                    name = %self.name,
                    from = %t.from,
                    to = %t.to,
                    "Circuit breaker state changed"
                ),
            }

            self.observer
                .state_transition(&self.name, t.from, t.to, t.time_in_from);

            for listener in self.listeners.iter() {
                listener.on_state_change(&self.name, t.from, t.to);
                match t.to {
                    CircuitState::Open => listener.on_open(&self.name),
                    CircuitState::Closed => listener.on_close(&self.name),
                    CircuitState::HalfOpen => {}
                }
            }
        }
    }

    /// Reserved for releasing resources; the breaker currently holds none.
    pub async fn shutdown(&self, _ctx: &CallContext) -> Result<()> {
        info!(name = %self.name, "Shutting down circuit breaker");
        Ok(())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

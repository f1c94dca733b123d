//! Prometheus Metrics for Resilience Primitives
//! An observer that turns resilience events into counters, gauges and histograms

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use super::events::{ResilienceObserver, RetryOutcome};
use crate::resilience::CircuitState;

const NAMESPACE: &str = "resilience";

/// Prometheus sink. Owns its registry so several services in one process do
/// not collide.
pub struct PrometheusObserver {
    registry: Registry,
    bulkhead_permits_total: CounterVec,
    bulkhead_limit_reached_total: CounterVec,
    bulkhead_occupied: GaugeVec,
    circuit_breaker_state_changes_total: CounterVec,
    circuit_breaker_state: GaugeVec,
    circuit_breaker_state_duration: HistogramVec,
    rate_limit_reached_total: CounterVec,
    rate_limit_latency: HistogramVec,
    retry_attempts_total: CounterVec,
    retry_outcomes_total: CounterVec,
    retry_wait: HistogramVec,
}

impl PrometheusObserver {
    pub fn new(service_name: &str) -> anyhow::Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(NAMESPACE)
                .const_label("service", service_name)
        };
        let histogram_opts = |name: &str, help: &str| {
            HistogramOpts::new(name, help)
                .namespace(NAMESPACE)
                .const_label("service", service_name)
        };

        let bulkhead_permits_total = CounterVec::new(
            opts("bulkhead_permits_total", "Bulkhead admission decisions"),
            &["bulkhead", "outcome"], // acquired, denied
        )?;

        let bulkhead_limit_reached_total = CounterVec::new(
            opts("bulkhead_limit_reached_total", "Times the bulkhead limit has been reached"),
            &["bulkhead"],
        )?;

        let bulkhead_occupied = GaugeVec::new(
            opts("bulkhead_occupied_slots", "Bulkhead permits held at the last admission decision"),
            &["bulkhead"],
        )?;

        let circuit_breaker_state_changes_total = CounterVec::new(
            opts("circuit_breaker_state_changes_total", "Circuit breaker state changes"),
            &["circuit", "from", "to"],
        )?;

        let circuit_breaker_state = GaugeVec::new(
            opts("circuit_breaker_state", "Circuit breaker state (0=closed, 0.5=half-open, 1=open)"),
            &["circuit"],
        )?;

        let circuit_breaker_state_duration = HistogramVec::new(
            histogram_opts(
                "circuit_breaker_state_duration_seconds",
                "Time spent in a circuit breaker state before leaving it",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
            &["circuit", "state"],
        )?;

        let rate_limit_reached_total = CounterVec::new(
            opts("rate_limit_reached_total", "Times a rate limit refused or abandoned a call"),
            &["key"],
        )?;

        let rate_limit_latency = HistogramVec::new(
            histogram_opts(
                "rate_limit_latency_seconds",
                "Latency of rate limited calls, token wait included",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["key"],
        )?;

        let retry_attempts_total = CounterVec::new(
            opts("retry_attempts_total", "Retries scheduled after a failed attempt"),
            &["operation"],
        )?;

        let retry_outcomes_total = CounterVec::new(
            opts("retry_outcomes_total", "How retry loops finished"),
            &["operation", "outcome"],
        )?;

        let retry_wait = HistogramVec::new(
            histogram_opts("retry_wait_seconds", "Backoff waited before a retry")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(bulkhead_permits_total.clone()))?;
        registry.register(Box::new(bulkhead_limit_reached_total.clone()))?;
        registry.register(Box::new(bulkhead_occupied.clone()))?;
        registry.register(Box::new(circuit_breaker_state_changes_total.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;
        registry.register(Box::new(circuit_breaker_state_duration.clone()))?;
        registry.register(Box::new(rate_limit_reached_total.clone()))?;
        registry.register(Box::new(rate_limit_latency.clone()))?;
        registry.register(Box::new(retry_attempts_total.clone()))?;
        registry.register(Box::new(retry_outcomes_total.clone()))?;
        registry.register(Box::new(retry_wait.clone()))?;

        tracing::info!(service = service_name, "Prometheus metrics initialized");

        Ok(Self {
            registry,
            bulkhead_permits_total,
            bulkhead_limit_reached_total,
            bulkhead_occupied,
            circuit_breaker_state_changes_total,
            circuit_breaker_state,
            circuit_breaker_state_duration,
            rate_limit_reached_total,
            rate_limit_latency,
            retry_attempts_total,
            retry_outcomes_total,
            retry_wait,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl ResilienceObserver for PrometheusObserver {
    fn permit_acquired(&self, bulkhead: &str, occupied: usize, _capacity: usize) {
        self.bulkhead_permits_total
            .with_label_values(&[bulkhead, "acquired"])
            .inc();
        self.bulkhead_occupied
            .with_label_values(&[bulkhead])
            .set(occupied as f64);
    }

    fn permit_denied(&self, bulkhead: &str, occupied: usize, _capacity: usize) {
        self.bulkhead_permits_total
            .with_label_values(&[bulkhead, "denied"])
            .inc();
        self.bulkhead_limit_reached_total
            .with_label_values(&[bulkhead])
            .inc();
        self.bulkhead_occupied
            .with_label_values(&[bulkhead])
            .set(occupied as f64);
    }

    fn state_transition(
        &self,
        breaker: &str,
        from: CircuitState,
        to: CircuitState,
        time_in_from: Duration,
    ) {
        self.circuit_breaker_state_changes_total
            .with_label_values(&[breaker, from.as_str(), to.as_str()])
            .inc();
        self.circuit_breaker_state
            .with_label_values(&[breaker])
            .set(to.as_gauge());
        self.circuit_breaker_state_duration
            .with_label_values(&[breaker, from.as_str()])
            .observe(time_in_from.as_secs_f64());
    }

    fn rate_limit_exceeded(&self, key: &str) {
        self.rate_limit_reached_total.with_label_values(&[key]).inc();
    }

    fn rate_limit_latency(&self, key: &str, elapsed: Duration) {
        self.rate_limit_latency
            .with_label_values(&[key])
            .observe(elapsed.as_secs_f64());
    }

    fn retry_attempt(&self, operation: &str, _attempt: u32, wait: Duration) {
        self.retry_attempts_total.with_label_values(&[operation]).inc();
        self.retry_wait
            .with_label_values(&[operation])
            .observe(wait.as_secs_f64());
    }

    fn retry_outcome(&self, operation: &str, outcome: RetryOutcome) {
        self.retry_outcomes_total
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
    }
}

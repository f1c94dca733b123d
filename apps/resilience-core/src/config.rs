//! Configuration Module
//! Resilience settings from environment variables or a JSON document

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ResilienceError;
use crate::resilience::{BulkheadConfig, CircuitBreakerConfig, RateLimiterConfig, RetryConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub bulkhead: BulkheadConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub retry: RetryConfig,
}

impl ResilienceConfig {
    /// Defaults overridden by `RESILIENCE_*` variables. Durations are in
    /// milliseconds.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        cfg.bulkhead.capacity = env_or("RESILIENCE_BULKHEAD_CAPACITY", cfg.bulkhead.capacity);
        cfg.bulkhead.timeout = env_millis("RESILIENCE_BULKHEAD_TIMEOUT_MS", cfg.bulkhead.timeout);

        let cb = &mut cfg.circuit_breaker;
        cb.max_requests = env_or("RESILIENCE_CB_MAX_REQUESTS", cb.max_requests);
        cb.interval = env_millis("RESILIENCE_CB_INTERVAL_MS", cb.interval);
        cb.timeout = env_millis("RESILIENCE_CB_TIMEOUT_MS", cb.timeout);
        cb.consecutive_failures = env_or("RESILIENCE_CB_CONSECUTIVE_FAILURES", cb.consecutive_failures);
        cb.failure_rate_threshold = env_or("RESILIENCE_CB_FAILURE_RATE_THRESHOLD", cb.failure_rate_threshold);

        cfg.rate_limiter.rps = env_or("RESILIENCE_RATE_LIMITER_RPS", cfg.rate_limiter.rps);
        cfg.rate_limiter.burst = env_or("RESILIENCE_RATE_LIMITER_BURST", cfg.rate_limiter.burst);

        let retry = &mut cfg.retry;
        retry.max_retries = env_or("RESILIENCE_RETRY_MAX_RETRIES", retry.max_retries);
        retry.initial_backoff = env_millis("RESILIENCE_RETRY_INITIAL_BACKOFF_MS", retry.initial_backoff);
        retry.max_backoff = env_millis("RESILIENCE_RETRY_MAX_BACKOFF_MS", retry.max_backoff);
        retry.backoff_factor = env_or("RESILIENCE_RETRY_BACKOFF_FACTOR", retry.backoff_factor);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        let invalid = |msg: &str| Err(ResilienceError::InvalidConfig(msg.to_string()));

        if self.bulkhead.capacity == 0 {
            return invalid("bulkhead.capacity must be greater than zero");
        }
        if self.circuit_breaker.consecutive_failures == 0 {
            return invalid("circuit_breaker.consecutive_failures must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.circuit_breaker.failure_rate_threshold) {
            return invalid("circuit_breaker.failure_rate_threshold must be within [0, 1]");
        }
        if self.rate_limiter.rps == 0 {
            return invalid("rate_limiter.rps must be greater than zero");
        }
        if self.rate_limiter.burst == 0 {
            return invalid("rate_limiter.burst must be greater than zero");
        }
        if self.retry.backoff_factor <= 1.0 || !self.retry.backoff_factor.is_finite() {
            return invalid("retry.backoff_factor must be greater than one");
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return invalid("retry.max_backoff must not be below retry.initial_backoff");
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_json_sections() {
        let cfg = ResilienceConfig::from_json_str(
            r#"{
                "bulkhead": { "capacity": 4, "timeout": 250 },
                "circuit_breaker": {
                    "max_requests": 2,
                    "interval": 0,
                    "timeout": 5000,
                    "consecutive_failures": 3,
                    "failure_rate_threshold": 0.25
                },
                "rate_limiter": { "rps": 20, "burst": 5 },
                "retry": {
                    "max_retries": 4,
                    "initial_backoff": 100,
                    "max_backoff": 1000,
                    "backoff_factor": 2.0
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.bulkhead.capacity, 4);
        assert_eq!(cfg.bulkhead.timeout, Duration::from_millis(250));
        assert!(cfg.circuit_breaker.interval.is_zero());
        assert_eq!(cfg.circuit_breaker.timeout, Duration::from_secs(5));
        assert_eq!(cfg.circuit_breaker.max_requests, 2);
        assert_eq!(cfg.rate_limiter.burst, 5);
        assert_eq!(cfg.retry.max_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let cfg = ResilienceConfig::from_json_str(r#"{ "rate_limiter": { "rps": 7 } }"#).unwrap();
        assert_eq!(cfg.rate_limiter.rps, 7);
        assert_eq!(cfg.rate_limiter.burst, RateLimiterConfig::default().burst);
        assert_eq!(cfg.bulkhead.capacity, BulkheadConfig::default().capacity);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = ResilienceConfig::default();
        cfg.retry.backoff_factor = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ResilienceConfig::default();
        cfg.circuit_breaker.failure_rate_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ResilienceConfig::default();
        cfg.bulkhead.capacity = 0;
        assert!(matches!(cfg.validate(), Err(ResilienceError::InvalidConfig(_))));

        assert!(ResilienceConfig::from_json_str(r#"{ "rate_limiter": { "burst": 0 } }"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("RESILIENCE_BULKHEAD_CAPACITY", "3");
        env::set_var("RESILIENCE_RETRY_INITIAL_BACKOFF_MS", "50");
        env::set_var("RESILIENCE_RATE_LIMITER_RPS", "not-a-number");

        let cfg = ResilienceConfig::from_env().unwrap();
        assert_eq!(cfg.bulkhead.capacity, 3);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(cfg.rate_limiter.rps, RateLimiterConfig::default().rps);

        env::remove_var("RESILIENCE_BULKHEAD_CAPACITY");
        env::remove_var("RESILIENCE_RETRY_INITIAL_BACKOFF_MS");
        env::remove_var("RESILIENCE_RATE_LIMITER_RPS");
    }
}

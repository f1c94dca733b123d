//! Retry Policy Tests
//! Attempt counting, backoff bounds, predicate and cancellation handling

use resilience_core::{
    CallContext, ResilienceError, ResilienceObserver, RetryConfig, RetryOutcome,
    RetryPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn config(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        backoff_factor: 2.0,
    }
}

#[derive(Default)]
struct RetryRecorder {
    waits: Mutex<Vec<Duration>>,
    outcomes: Mutex<Vec<RetryOutcome>>,
}

impl ResilienceObserver for RetryRecorder {
    fn retry_attempt(&self, _operation: &str, _attempt: u32, wait: Duration) {
        self.waits.lock().unwrap().push(wait);
    }

    fn retry_outcome(&self, _operation: &str, outcome: RetryOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_retries() {
        let recorder = Arc::new(RetryRecorder::default());
        let policy = RetryPolicy::new("fetch_quote", config(4)).with_observer(recorder.clone());
        let attempts = AtomicU32::new(0);
        let started_at = Mutex::new(Vec::new());

        let err = policy
            .execute(&CallContext::new(), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                started_at.lock().unwrap().push(Instant::now());
                async move { Err::<(), _>(ResilienceError::msg(format!("attempt {n} failed"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        match &err {
            ResilienceError::RetriesExhausted { attempts, last } => {
                assert_eq!(*attempts, 4);
                assert_eq!(last.to_string(), "attempt 4 failed");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }

        // no wait after the final attempt
        let waits = recorder.waits.lock().unwrap().clone();
        assert_eq!(waits.len(), 3);
        let mut backoff = Duration::from_millis(100);
        for wait in &waits {
            assert!(*wait >= backoff);
            assert!(*wait < backoff * 2);
            assert!(*wait <= Duration::from_secs(1));
            backoff = (backoff * 2).min(Duration::from_secs(1));
        }

        let started_at = started_at.lock().unwrap().clone();
        for (i, pair) in started_at.windows(2).enumerate() {
            assert!(pair[1] - pair[0] >= waits[i]);
        }
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![RetryOutcome::Exhausted]);
    }

    #[tokio::test]
    async fn test_first_success_skips_predicate() {
        let recorder = Arc::new(RetryRecorder::default());
        let consulted = Arc::new(AtomicBool::new(false));
        let flag = consulted.clone();
        let policy = RetryPolicy::new("fetch_quote", config(4))
            .with_observer(recorder.clone())
            .with_should_retry(move |_| {
                flag.store(true, Ordering::SeqCst);
                true
            });

        let value = tokio_test::assert_ok!(
            policy.execute(&CallContext::new(), || async { Ok(99) }).await
        );

        assert_eq!(value, 99);
        assert!(!consulted.load(Ordering::SeqCst));
        assert!(recorder.waits.lock().unwrap().is_empty());
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![RetryOutcome::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::new("fetch_quote", config(5));
        let attempts = AtomicU32::new(0);

        let value = policy
            .execute(&CallContext::new(), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ResilienceError::msg("temporary failure"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returned_unwrapped() {
        let policy = RetryPolicy::new("fetch_quote", config(4))
            .with_should_retry(|err| !err.to_string().contains("invalid"));
        let attempts = AtomicU32::new(0);

        let err = policy
            .execute(&CallContext::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ResilienceError::msg("invalid symbol")) }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ResilienceError::Operation(_)));
        assert_eq!(err.to_string(), "invalid symbol");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::new("fetch_quote", config(4));
        let attempts = AtomicU32::new(0);

        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = policy
            .execute(&ctx, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ResilienceError::msg("temporary failure")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Canceled));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_pre_cancelled_context_makes_no_attempt() {
        let policy = RetryPolicy::new("fetch_quote", config(4));
        let attempts = AtomicU32::new(0);
        let ctx = CallContext::new();
        ctx.cancel();

        let err = policy
            .execute(&ctx, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Canceled));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_from_operation_is_final() {
        let policy = RetryPolicy::new("fetch_quote", config(4)).with_should_retry(|_| true);
        let attempts = AtomicU32::new(0);

        let err = policy
            .execute(&CallContext::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ResilienceError::DeadlineExceeded) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::DeadlineExceeded));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_max_retries_still_runs_once() {
        let policy = RetryPolicy::new("fetch_quote", config(0));
        let attempts = AtomicU32::new(0);

        let err = policy
            .execute(&CallContext::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ResilienceError::msg("down")) }
            })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ResilienceError::RetriesExhausted { attempts: 1, .. }));
    }
}

//! Bulkhead
//! Caps the number of concurrent calls into one dependency so it cannot
//! exhaust resources shared with the rest of the service

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{catch_panic, race_with_context, Fallback};
use crate::context::CallContext;
use crate::error::{ResilienceError, Result};
use crate::observability::{NoopObserver, ResilienceObserver};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub capacity: usize,
    #[serde(with = "crate::config::millis")]
    pub timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            timeout: Duration::from_secs(1),
        }
    }
}

pub struct Bulkhead {
    name: String,
    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    timeout: Duration,
    resize: Mutex<()>,
    observer: Arc<dyn ResilienceObserver>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: &BulkheadConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(ResilienceError::InvalidConfig(
                "bulkhead capacity must be greater than zero".into(),
            ));
        }

        let name = name.into();
        info!(
            name = %name,
            capacity = config.capacity,
            timeout_ms = config.timeout.as_millis() as u64,
            "Bulkhead initialized"
        );

        Ok(Self {
            name,
            semaphore: Arc::new(Semaphore::new(config.capacity)),
            capacity: AtomicUsize::new(config.capacity),
            timeout: config.timeout,
            resize: Mutex::new(()),
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of permits currently held.
    pub fn usage(&self) -> usize {
        self.capacity()
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `f` once a permit is free.
    ///
    /// Cancellation of `ctx` is checked before the permit and the timeout, so
    /// it wins when several become ready together. The permit travels with the
    /// spawned operation and is returned when the operation finishes, even if
    /// the caller stopped waiting for it.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        f: F,
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

        let permit = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            acquired = self.semaphore.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => {
                    let err = ResilienceError::AdmissionDenied { name: self.name.clone() };
                    return self.deny(err, fallback).await;
                }
            },
            _ = sleep(self.timeout) => {
                let err = ResilienceError::AdmissionTimeout {
                    name: self.name.clone(),
                    timeout: self.timeout,
                };
                return self.deny(err, fallback).await;
            }
        };

        let occupied = self.usage();
        let capacity = self.capacity();
        debug!(
            name = %self.name,
            occupied_slots = occupied,
            total_capacity = capacity,
            "Bulkhead permit acquired"
        );
        self.observer.permit_acquired(&self.name, occupied, capacity);

        let operation = f();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            catch_panic(operation).await
        });

        race_with_context(ctx, handle).await
    }

    async fn deny<T>(&self, err: ResilienceError, fallback: Option<Fallback<T>>) -> Result<T> {
        let occupied = self.usage();
        let capacity = self.capacity();
        warn!(
            name = %self.name,
            occupied_slots = occupied,
            total_capacity = capacity,
            error = %err,
            "Bulkhead limit reached"
        );
        self.observer.permit_denied(&self.name, occupied, capacity);

        match fallback {
            Some(fallback) => fallback().await,
            None => Err(err),
        }
    }

    /// Grow or shrink the permit pool.
    ///
    /// Growing takes effect immediately. Shrinking waits until enough permits
    /// have been returned by their holders; no in-flight permit is revoked.
    pub async fn set_capacity(&self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            return Err(ResilienceError::InvalidConfig(
                "bulkhead capacity must be greater than zero".into(),
            ));
        }

        let _resize = self.resize.lock().await;
        let current = self.capacity();

        if new_capacity > current {
            self.semaphore.add_permits(new_capacity - current);
            self.capacity.store(new_capacity, Ordering::Release);
        } else {
            // One permit at a time, so `capacity - available` never counts a
            // permit that is parked in a pending shrink as held.
            for _ in new_capacity..current {
                let retired = self.semaphore.acquire().await.map_err(|_| {
                    ResilienceError::AdmissionDenied {
                        name: self.name.clone(),
                    }
                })?;
                retired.forget();
                self.capacity.fetch_sub(1, Ordering::AcqRel);
            }
        }

        info!(
            name = %self.name,
            from = current,
            to = new_capacity,
            "Bulkhead capacity updated"
        );
        Ok(())
    }

    /// Close the permit pool. Waiting and future callers are denied.
    pub fn close(&self) {
        self.semaphore.close();
        info!(name = %self.name, "Bulkhead closed");
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("usage", &self.usage())
            .field("timeout", &self.timeout)
            .finish()
    }
}

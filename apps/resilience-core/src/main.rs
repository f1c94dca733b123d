//! Resilience Demo - drives a simulated flaky dependency through the pipeline
//! and prints the resulting Prometheus metrics on shutdown

use resilience_core::observability::{init_observability, LogFormat};
use resilience_core::{
    fallback, CallContext, PrometheusObserver, RateLimiter, ResilienceConfig, ResilienceError,
    ResilienceOrchestrator,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("RESILIENCE_CONFIG") {
        Ok(path) => ResilienceConfig::from_json_file(path)?,
        Err(_) => ResilienceConfig::from_env()?,
    };

    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("compact") => LogFormat::Compact,
        _ => LogFormat::Json,
    };
    init_observability("resilience-demo", format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting resilience demo...");

    let metrics = Arc::new(PrometheusObserver::new("resilience-demo")?);
    let limiters = Arc::new(RateLimiter::new().with_observer(metrics.clone()));
    let orchestrator = Arc::new(
        ResilienceOrchestrator::new("inventory", &config, limiters, metrics.clone()).await?,
    );

    let failure_every: u64 = std::env::var("DEMO_FAILURE_EVERY")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3)
        .max(1);
    let calls = Arc::new(AtomicU64::new(0));

    // Cancelled by ctrl-c; every in-flight call observes it
    let root = CallContext::new();
    let shutdown = root.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown.cancel();
    });

    let mut workers = JoinSet::new();
    for worker in 0..4u32 {
        let orchestrator = orchestrator.clone();
        let calls = calls.clone();
        let root = root.clone();
        workers.spawn(async move {
            while !root.is_done() {
                let ctx = root.child_with_timeout(Duration::from_secs(2));
                let calls = calls.clone();
                let result = orchestrator
                    .execute_with_fallback(
                        &ctx,
                        move || {
                            let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
                            async move {
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                if n % failure_every == 0 {
                                    Err(ResilienceError::msg(format!("dependency failed on call {n}")))
                                } else {
                                    Ok(n)
                                }
                            }
                        },
                        Some(fallback(|| async { Ok(0) })),
                    )
                    .await;

                match result {
                    Ok(0) => warn!(worker, "Served fallback"),
                    Ok(n) => info!(worker, call = n, "Call succeeded"),
                    Err(e) if e.is_cancellation() => break,
                    Err(e) => error!(worker, error = %e, "Call failed"),
                }
            }
        });
    }

    while workers.join_next().await.is_some() {}

    orchestrator.shutdown(&CallContext::new()).await?;
    println!("{}", metrics.encode());
    info!("Resilience demo stopped");
    Ok(())
}

//! Observability Module - Structured Logging, Event Hooks, Prometheus Sink
//! The primitives only emit events; formatting and export live here

pub mod events;
pub mod metrics;

pub use events::{CircuitBreakerListener, NoopObserver, ResilienceObserver, RetryOutcome};
pub use metrics::PrometheusObserver;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line, with span context.
    #[default]
    Json,
    /// Single-line human readable output.
    Compact,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Fails if a subscriber is already installed.
pub fn init_observability(service_name: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,resilience_core=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true);
            registry.with(json_layer).try_init()?;
        }
        LogFormat::Compact => {
            registry.with(fmt::layer().compact().with_target(true)).try_init()?;
        }
    }

    tracing::info!(service = service_name, "Observability stack initialized");
    Ok(())
}

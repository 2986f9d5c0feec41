// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics). Returns `false` if it already ran.
pub fn init_telemetry() -> bool {
    if PROM_HANDLE.get().is_some() {
        return false;
    }

    // 1. Logs. A host that installed its own subscriber keeps it.
    let logs = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "eventrail_engine=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if logs.is_err() {
        tracing::debug!("Global subscriber already set, keeping it");
    }

    // 2. Metrics (Prometheus)
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Prometheus recorder not installed: {}", e);
            return false;
        }
    };
    if PROM_HANDLE.set(handle).is_err() {
        return false;
    }

    describe_metrics();
    true
}

fn describe_metrics() {
    metrics::describe_counter!("eventrail_events_delivered_total", "Events delivered by a log source");
    metrics::describe_counter!("eventrail_events_handled_total", "Events a consumer handled successfully");
    metrics::describe_counter!("eventrail_handler_failures_total", "Failed handler invocations");
    metrics::describe_counter!("eventrail_reconnect_attempts_total", "Reconnects after a server error drop");
    metrics::describe_counter!("eventrail_ack_retries_total", "Handler retries scheduled by the ack retry policy");
    metrics::describe_counter!("eventrail_events_parked_total", "Events parked after exhausting retries");
    metrics::describe_counter!("eventrail_events_skipped_total", "Events skipped after exhausting retries");
    metrics::describe_counter!("eventrail_checkpoints_total", "Checkpoints handed to the host");
}

/// Prometheus exposition text for everything recorded so far.
pub fn render_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}

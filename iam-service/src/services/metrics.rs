//! Metrics collection for iam-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    });
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_decision(granted: bool, ownership: bool) {
    metrics::counter!(
        "access_decisions_total",
        "granted" => granted.to_string(),
        "via" => if ownership { "ownership" } else { "policy" }
    )
    .increment(1);
}

/// A multi-step sequence left the identity graph partially applied.
pub fn record_inconsistency(operation: &'static str) {
    metrics::counter!("graph_inconsistencies_total", "operation" => operation).increment(1);
}

//! Recorder for the `metrics` facade used by the HTTP middleware.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process.
///
/// Later calls are no-ops, so test harnesses that build several applications
/// in one process can call this freely.
pub fn init_http_metrics() {
    HTTP_METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder already installed, using detached handle");
            PrometheusBuilder::new().build_recorder().handle()
        }
    });
}

/// Render HTTP metrics in Prometheus text format.
pub fn render_http_metrics() -> String {
    HTTP_METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

//! Prometheus wiring. `PerformanceCounters` mirrors every update into the
//! recorder installed here; this module only owns installation and the
//! exposition route.

use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Call once at startup, before any counter
    /// is touched; a second install panics.
    pub fn init(model_count: usize) -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");

        // Set once; never updated after startup.
        gauge!("analysis_configured_models").set(model_count as f64);

        Self { handle }
    }

    /// `GET /metrics` rendering the current exposition snapshot.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    }
}

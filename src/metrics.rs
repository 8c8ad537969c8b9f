// src/metrics.rs
use axum::{routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the curator series so
    /// they show up on /metrics before first increment.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!("curator_items_total", "Items consumed by the decision engine.");
        describe_counter!("curator_promoted_total", "Promotion actions emitted.");
        describe_counter!("curator_rejected_total", "Items rejected by classifier or filters.");
        describe_counter!(
            "curator_link_suppressed_total",
            "Items suppressed by the link dedup window."
        );
        describe_counter!("ingest_items_total", "Items delivered by feed producers.");
        describe_counter!("ingest_feed_errors_total", "Feed poll failures.");

        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

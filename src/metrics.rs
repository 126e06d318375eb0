use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and register metric descriptions.
    pub fn init(lease_ttl_secs: u64) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!("fetch_jobs_total", "Fetch and discovery jobs accepted.");
        describe_counter!(
            "fetch_coalesced_total",
            "Fetch requests coalesced onto an already-running job."
        );
        describe_counter!("fetch_sweeps_total", "Periodic sweep passes over enabled sources.");
        describe_counter!("fetch_items_added_total", "New articles stored by fetch jobs.");
        describe_counter!("fetch_failures_total", "Fetch jobs that ended in failure.");
        describe_counter!("dedup_created_total", "Reconcile outcomes: new article rows.");
        describe_counter!("dedup_updated_total", "Reconcile outcomes: in-place updates.");
        describe_counter!("dedup_skipped_total", "Reconcile outcomes: unchanged or unkeyable.");
        describe_counter!(
            "discovery_queued_total",
            "Per-article fetch jobs queued by discovery runs."
        );

        // Static gauge so dashboards can show the configured lease window.
        gauge!("source_lease_ttl_seconds").set(lease_ttl_secs as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
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

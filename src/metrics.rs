use axum::{routing::get, Router};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and register the pipeline series so
    /// they show up on /metrics before their first increment.
    pub fn init() -> Self {
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!("poll_ticks_total", "Poll cycles started across all sources.");
        describe_counter!("poll_errors_total", "Fetch failures that triggered back-off.");
        describe_counter!("poll_items_total", "New items handed to the dispatcher.");
        describe_counter!("dispatch_matched_total", "Items that passed the relevance filter.");
        describe_counter!("dispatch_skipped_total", "Items rejected by the relevance filter.");
        describe_counter!("classify_calls_total", "Classifier invocations.");
        describe_counter!("classify_failures_total", "Classifier call/parse failures.");
        describe_counter!("notifications_total", "Verdicts that passed the notification gate.");
        describe_counter!("push_failures_total", "Push sink delivery failures.");
        describe_counter!("playback_jobs_total", "Speech playback tasks executed.");
        describe_counter!("playback_failures_total", "Playback tasks that failed.");

        Self { handle }
    }

    /// Router exposing `/metrics` in Prometheus exposition format.
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

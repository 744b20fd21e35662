use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: job counters, processing latency and queue gauges in
/// Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the pipeline records.
pub fn describe_metrics() {
    metrics::describe_counter!("video_jobs_received_total", "Messages received from the job queue");
    metrics::describe_counter!("video_jobs_completed_total", "Jobs that produced an archive");
    metrics::describe_counter!("video_jobs_failed_total", "Jobs that failed every attempt");
    metrics::describe_counter!("video_jobs_malformed_total", "Messages rejected as malformed");
    metrics::describe_counter!("video_job_attempts_total", "Processor attempts started");
    metrics::describe_counter!(
        "video_status_update_failures_total",
        "Catalog status updates that failed"
    );
    metrics::describe_counter!("video_jobs_published_total", "Jobs placed on the queue");
    metrics::describe_histogram!(
        "video_job_processing_seconds",
        metrics::Unit::Seconds,
        "Time from first attempt to terminal outcome"
    );
    metrics::describe_gauge!("video_jobs_in_flight", "Jobs currently being handled by this worker");
    metrics::describe_gauge!("video_queue_depth", "Entries currently held by the job stream");
}

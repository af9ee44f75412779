use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use crate::job_queue::QueueSizes;
use crate::task_store::TaskStatus;

/// Metric name prefix for all task server metrics
const PREFIX: &str = "agent_tasks";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Task Metrics
    pub static ref TASKS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_submitted_total"), "Tasks accepted for processing"),
        &["task_type"]
    ).expect("Failed to create submitted_total metric");

    pub static ref TASKS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_finished_total"), "Tasks that reached a terminal status"),
        &["task_type", "status"]
    ).expect("Failed to create finished_total metric");

    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_duration_seconds"),
            "Wall-clock time from claim to terminal status"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 120.0, 300.0, 600.0]),
        &["task_type"]
    ).expect("Failed to create duration_seconds metric");

    pub static ref TASKS_RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_running"),
        "Tasks currently held by a worker"
    ).expect("Failed to create running metric");

    pub static ref QUEUE_LANE_SIZE: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_lane_size"), "Entries waiting per lane"),
        &["lane"]
    ).expect("Failed to create queue_lane_size metric");

    pub static ref WORKER_BACKEND_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_worker_backend_errors_total"),
        "Worker loop iterations aborted by a queue or store failure"
    ).expect("Failed to create worker_backend_errors_total metric");

    pub static ref LEASES_EXPIRED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_leases_expired_total"),
        "Running tasks failed by the lease reaper"
    ).expect("Failed to create leases_expired_total metric");

    // Webhook Metrics
    pub static ref WEBHOOK_DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_webhook_deliveries_total"), "Webhook deliveries by outcome"),
        &["outcome"]
    ).expect("Failed to create webhook_deliveries_total metric");

    pub static ref WEBHOOK_ATTEMPTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_webhook_attempts_total"),
        "Individual webhook HTTP attempts"
    ).expect("Failed to create webhook_attempts_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_LANE_SIZE.clone()));
    let _ = REGISTRY.register(Box::new(WORKER_BACKEND_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEASES_EXPIRED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WEBHOOK_DELIVERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WEBHOOK_ATTEMPTS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Replaces path segments that carry ids, keeping label cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut normalized = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let prev = if i > 0 { segments[i - 1] } else { "" };
        if (prev == "tasks" || prev == "history") && !segment.is_empty() {
            normalized.push("{id}");
        } else {
            normalized.push(segment);
        }
    }
    normalized.join("/")
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let path = normalize_path(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, &path])
        .observe(duration.as_secs_f64());
}

pub fn record_task_submitted(task_type: &str) {
    TASKS_SUBMITTED_TOTAL.with_label_values(&[task_type]).inc();
}

/// Holds `TASKS_RUNNING` up by one until dropped.
pub struct RunningTaskGuard(Gauge);

impl RunningTaskGuard {
    fn track(gauge: Gauge) -> Self {
        gauge.inc();
        RunningTaskGuard(gauge)
    }
}

impl Drop for RunningTaskGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Marks a claimed task as running for as long as the guard lives.
pub fn track_running_task() -> RunningTaskGuard {
    RunningTaskGuard::track(TASKS_RUNNING.clone())
}

pub fn record_task_finished(task_type: &str, status: TaskStatus, elapsed: Option<Duration>) {
    TASKS_FINISHED_TOTAL
        .with_label_values(&[task_type, status.as_str()])
        .inc();
    if let Some(elapsed) = elapsed {
        TASK_DURATION_SECONDS
            .with_label_values(&[task_type])
            .observe(elapsed.as_secs_f64());
    }
}

pub fn record_queue_sizes(sizes: &QueueSizes) {
    QUEUE_LANE_SIZE
        .with_label_values(&["high"])
        .set(sizes.high as f64);
    QUEUE_LANE_SIZE
        .with_label_values(&["medium"])
        .set(sizes.medium as f64);
    QUEUE_LANE_SIZE
        .with_label_values(&["low"])
        .set(sizes.low as f64);
}

pub fn record_worker_backend_error() {
    WORKER_BACKEND_ERRORS_TOTAL.inc();
}

pub fn record_leases_expired(count: usize) {
    LEASES_EXPIRED_TOTAL.inc_by(count as f64);
}

pub fn record_webhook_delivery(outcome: &str, attempts: u32) {
    WEBHOOK_DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
    WEBHOOK_ATTEMPTS_TOTAL.inc_by(attempts as f64);
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

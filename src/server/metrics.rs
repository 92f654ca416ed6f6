use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "weather_notifier";

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
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job runs by outcome"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job run duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "1 while a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Outbox Metrics
    pub static ref CONFIRMATION_EMAILS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_confirmation_emails_total"), "Confirmation email deliveries by outcome"),
        &["outcome"]
    ).expect("Failed to create confirmation_emails_total metric");

    // Report Metrics
    pub static ref REPORT_EMAILS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_report_emails_total"), "Weather report emails by frequency and outcome"),
        &["frequency", "outcome"]
    ).expect("Failed to create report_emails_total metric");

    pub static ref WEATHER_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_weather_lookups_total"), "Weather lookups by outcome"),
        &["outcome"]
    ).expect("Failed to create weather_lookups_total metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(CONFIRMATION_EMAILS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REPORT_EMAILS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WEATHER_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapses path parameters so tokens do not explode label cardinality.
pub fn normalize_path(path: &str) -> &'static str {
    if path.starts_with("/confirm/") {
        "/confirm/{token}"
    } else if path.starts_with("/unsubscribe/") {
        "/unsubscribe/{token}"
    } else {
        match path {
            "/" => "/",
            "/subscribe" => "/subscribe",
            "/weather" => "/weather",
            _ => "other",
        }
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let path = normalize_path(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// `outcome` is one of delivered, failed or exhausted.
pub fn record_confirmation_emails(outcome: &str, count: usize) {
    if count > 0 {
        CONFIRMATION_EMAILS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// `outcome` is one of sent, failed or skipped.
pub fn record_report_emails(frequency: &str, outcome: &str, count: usize) {
    if count > 0 {
        REPORT_EMAILS_TOTAL
            .with_label_values(&[frequency, outcome])
            .inc_by(count as f64);
    }
}

pub fn record_weather_lookup(outcome: &str) {
    WEATHER_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
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

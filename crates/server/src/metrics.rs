//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the vidpress server:
//! - HTTP request metrics (latency, counts)
//! - Authentication failures
//! - WebSocket subscriber metrics
//! - Job submission and outcome metrics
//! - Worker pool status (collected dynamically from the engine)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "vidpress_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vidpress_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "vidpress_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active job event subscribers.
pub static WS_SUBSCRIBERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "vidpress_ws_subscribers_active",
        "Number of WebSocket clients following a job",
    )
    .unwrap()
});

/// Job events sent over WebSocket, by event type.
pub static WS_EVENTS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vidpress_ws_events_sent_total", "Job events sent to WebSocket clients"),
        &["type"],
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs accepted by the engine.
pub static JOBS_SUBMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vidpress_jobs_submitted_total",
        "Total jobs accepted since startup",
    )
    .unwrap()
});

/// Submissions rejected synchronously, by reason.
pub static JOBS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vidpress_jobs_rejected_total", "Total rejected submissions"),
        &["reason"],
    )
    .unwrap()
});

/// Finished jobs by outcome (collected dynamically).
pub static JOBS_FINISHED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("vidpress_jobs_finished", "Jobs finished since startup by outcome"),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Worker Pool Metrics (collected dynamically)
// =============================================================================

/// Running jobs.
pub static POOL_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("vidpress_pool_active", "Number of running transcode jobs").unwrap()
});

/// Jobs waiting for a worker slot.
pub static POOL_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("vidpress_pool_queued", "Number of queued transcode jobs").unwrap()
});

/// Worker slots.
pub static POOL_CAPACITY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("vidpress_pool_capacity", "Maximum concurrent transcode jobs").unwrap()
});

// =============================================================================
// Auth Metrics
// =============================================================================

/// Rejected API requests, by reason.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vidpress_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Auth
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_SUBSCRIBERS_ACTIVE.clone()))
        .unwrap();
    registry.register(Box::new(WS_EVENTS_SENT.clone())).unwrap();

    // Jobs
    registry
        .register(Box::new(JOBS_SUBMITTED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(JOBS_REJECTED_TOTAL.clone()))
        .unwrap();
    registry.register(Box::new(JOBS_FINISHED.clone())).unwrap();

    // Pool
    registry.register(Box::new(POOL_ACTIVE.clone())).unwrap();
    registry.register(Box::new(POOL_QUEUED.clone())).unwrap();
    registry.register(Box::new(POOL_CAPACITY.clone())).unwrap();
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from the engine's pool status.
///
/// Called before encoding so the gauges reflect the current pool.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.engine().pool_status();
    POOL_ACTIVE.set(status.active_jobs as i64);
    POOL_QUEUED.set(status.queued_jobs as i64);
    POOL_CAPACITY.set(status.max_concurrent as i64);

    JOBS_FINISHED
        .with_label_values(&["completed"])
        .set(status.total_completed as i64);
    JOBS_FINISHED
        .with_label_values(&["failed"])
        .set(status.total_failed as i64);
    JOBS_FINISHED
        .with_label_values(&["cancelled"])
        .set(status.total_cancelled as i64);
}

static UUID_REGEX: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

/// Normalize a path for metric labels (replace job ids with a placeholder).
pub fn normalize_path(path: &str) -> String {
    UUID_REGEX.replace_all(path, "{id}").to_string()
}

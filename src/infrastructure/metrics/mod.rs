//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts and latency by method, path, and status
//! - Bus publishes and consumed records by topic and outcome
//! - Sequencer outcomes (inserted, duplicate, dropped)
//! - Channel adapter attempts and latency by channel and status
//! - Webhook callbacks by kind and outcome
//! - Active realtime connections and pushed frames

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "relay_hub";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Records published to the bus
pub static BUS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bus_published_total", "Records published to the message bus")
            .namespace(NAMESPACE),
        &["topic", "outcome"], // "ok", "error"
    )
    .expect("Failed to create BUS_PUBLISHED_TOTAL metric")
});

/// Records handled by consumer loops
pub static BUS_CONSUMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bus_consumed_total", "Records handled by consumer loops").namespace(NAMESPACE),
        &["topic", "outcome"], // "processed", "retried", "failed", "dropped"
    )
    .expect("Failed to create BUS_CONSUMED_TOTAL metric")
});

/// Sequencer outcomes
pub static MESSAGES_PERSISTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_persisted_total", "Ingest events handled by the sequencer")
            .namespace(NAMESPACE),
        &["outcome"], // "inserted", "duplicate", "dropped"
    )
    .expect("Failed to create MESSAGES_PERSISTED_TOTAL metric")
});

/// Channel adapter hand-offs
pub static DELIVERY_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("delivery_attempts_total", "Channel adapter hand-offs").namespace(NAMESPACE),
        &["channel", "status"],
    )
    .expect("Failed to create DELIVERY_ATTEMPTS_TOTAL metric")
});

/// Channel adapter latency
pub static ADAPTER_CALL_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "adapter_call_duration_seconds",
            "Channel adapter call latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["channel"],
    )
    .expect("Failed to create ADAPTER_CALL_DURATION_SECONDS metric")
});

/// Delivery/read callbacks
pub static WEBHOOK_CALLBACKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("webhook_callbacks_total", "Delivery and read callbacks received")
            .namespace(NAMESPACE),
        &["kind", "outcome"], // "accepted", "unauthorized", "invalid", "ignored", "error"
    )
    .expect("Failed to create WEBHOOK_CALLBACKS_TOTAL metric")
});

/// Open realtime connections
pub static REALTIME_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "realtime_connections_active",
            "Number of open realtime connections",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create REALTIME_CONNECTIONS_ACTIVE metric")
});

/// Frames pushed to realtime connections
pub static REALTIME_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("realtime_frames_total", "Event frames pushed to realtime connections")
            .namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Failed to create REALTIME_FRAMES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(BUS_PUBLISHED_TOTAL.clone()))
        .expect("Failed to register BUS_PUBLISHED_TOTAL");
    registry
        .register(Box::new(BUS_CONSUMED_TOTAL.clone()))
        .expect("Failed to register BUS_CONSUMED_TOTAL");
    registry
        .register(Box::new(MESSAGES_PERSISTED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_PERSISTED_TOTAL");
    registry
        .register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))
        .expect("Failed to register DELIVERY_ATTEMPTS_TOTAL");
    registry
        .register(Box::new(ADAPTER_CALL_DURATION_SECONDS.clone()))
        .expect("Failed to register ADAPTER_CALL_DURATION_SECONDS");
    registry
        .register(Box::new(WEBHOOK_CALLBACKS_TOTAL.clone()))
        .expect("Failed to register WEBHOOK_CALLBACKS_TOTAL");
    registry
        .register(Box::new(REALTIME_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register REALTIME_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(REALTIME_FRAMES_TOTAL.clone()))
        .expect("Failed to register REALTIME_FRAMES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_published(topic: &str, ok: bool) {
    BUS_PUBLISHED_TOTAL
        .with_label_values(&[topic, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_consumed(topic: &str, outcome: &str) {
    BUS_CONSUMED_TOTAL.with_label_values(&[topic, outcome]).inc();
}

pub fn record_persisted(outcome: &str) {
    MESSAGES_PERSISTED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper to record one adapter hand-off
pub fn record_delivery_attempt(channel: &str, status: &str, duration_secs: f64) {
    DELIVERY_ATTEMPTS_TOTAL
        .with_label_values(&[channel, status])
        .inc();
    ADAPTER_CALL_DURATION_SECONDS
        .with_label_values(&[channel])
        .observe(duration_secs);
}

pub fn record_webhook(kind: &str, outcome: &str) {
    WEBHOOK_CALLBACKS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Helper to update the realtime connection gauge
pub fn set_realtime_connections(count: usize) {
    REALTIME_CONNECTIONS_ACTIVE.set(count as i64);
}

pub fn record_realtime_frame(topic: &str) {
    REALTIME_FRAMES_TOTAL.with_label_values(&[topic]).inc();
}

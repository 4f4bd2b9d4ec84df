use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

struct Metrics {
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    settlement_outcomes_total: IntCounterVec,
    settlement_status_polls_total: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn build(registry: &Registry) -> Result<Metrics, prometheus::Error> {
    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;
    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;
    let settlement_outcomes_total = IntCounterVec::new(
        Opts::new(
            "settlement_outcomes_total",
            "Settlement attempts by method and outcome",
        ),
        &["method", "outcome"],
    )?;
    let settlement_status_polls_total = IntCounter::new(
        "settlement_status_polls_total",
        "Gateway payment status queries issued",
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(settlement_outcomes_total.clone()))?;
    registry.register(Box::new(settlement_status_polls_total.clone()))?;

    Ok(Metrics {
        http_requests_total,
        http_request_duration_seconds,
        settlement_outcomes_total,
        settlement_status_polls_total,
    })
}

/// Registers every collector. Safe to call more than once; only the first
/// call has an effect.
pub fn init_metrics() {
    if METRICS.get().is_some() {
        return;
    }

    let registry = Registry::new();
    match build(&registry) {
        Ok(metrics) => {
            let _ = REGISTRY.set(registry);
            let _ = METRICS.set(metrics);
        }
        Err(e) => tracing::error!(error = %e, "Failed to register metrics"),
    }
}

pub fn get_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, path: &str, status: &str, seconds: f64) {
    if let Some(metrics) = METRICS.get() {
        let labels = [method, path, status];
        metrics.http_requests_total.with_label_values(&labels).inc();
        metrics
            .http_request_duration_seconds
            .with_label_values(&labels)
            .observe(seconds);
    }
}

pub fn record_settlement_outcome(method: &str, outcome: &str) {
    if let Some(metrics) = METRICS.get() {
        metrics
            .settlement_outcomes_total
            .with_label_values(&[method, outcome])
            .inc();
    }
}

pub fn record_status_poll() {
    if let Some(metrics) = METRICS.get() {
        metrics.settlement_status_polls_total.inc();
    }
}

use std::sync::Once;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("http_requests_total", "HTTP requests by method and status"),
        &["method", "status"]
    )
    .expect("valid metric definition");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request latency in seconds"),
        &["method", "route"]
    )
    .expect("valid metric definition");

    pub static ref BACKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("backups_total", "Database backup attempts by outcome"),
        &["status"]
    )
    .expect("valid metric definition");
}

static REGISTER: Once = Once::new();

pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
            Box::new(HTTP_REQUESTS_TOTAL.clone()),
            Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
            Box::new(BACKUPS_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!(error = %e, "metric registration failed");
            }
        }
    });
}

/// Records count and latency for every request.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(req).await;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), route.as_str()])
        .observe(started.elapsed().as_secs_f64());

    response
}

/// Prometheus text exposition of the registry.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "metrics encoding failed");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

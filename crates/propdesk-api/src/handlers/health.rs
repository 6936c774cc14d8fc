use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, http::header, response::IntoResponse, Json};
use serde::Serialize;

use crate::{metrics, AppState};

lazy_static::lazy_static! {
    pub(crate) static ref START_TIME: Instant = Instant::now();
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub database: ComponentStatus,
}

#[derive(Serialize, Debug)]
pub struct ComponentStatus {
    pub status: &'static str,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let database = match state.store.ping().await {
        Ok(()) => ComponentStatus {
            status: "healthy",
            response_time_ms: started.elapsed().as_millis() as u64,
            error: None,
        },
        Err(e) => ComponentStatus {
            status: "unhealthy",
            response_time_ms: started.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    };

    let healthy = database.status == "healthy";
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        uptime_seconds: START_TIME.elapsed().as_secs(),
        database,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

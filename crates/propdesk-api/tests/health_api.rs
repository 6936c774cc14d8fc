mod common;

use axum::http::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn health_reports_database_status() {
    let app = common::spawn_app().await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn metrics_count_requests() {
    propdesk_api::metrics::register_metrics();
    let app = common::spawn_app().await;

    app.server.get("/health").await.assert_status_ok();
    let response = app.server.get("/metrics").await;
    response.assert_status_ok();
    assert!(response.text().contains("http_requests_total"));
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let app = common::spawn_app().await;
    app.server
        .get("/nope")
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

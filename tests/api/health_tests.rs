//! Health Check API Tests

use axum::http::StatusCode;

use crate::common::{body_json, TestApp};

#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::without_workers().await;

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("version").is_some());
}

#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::without_workers().await;
    app.bus.set_available(false);

    // Liveness ignores dependencies
    let response = app.get("/health/live").await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_reports_dependencies() {
    let app = TestApp::without_workers().await;
    let _socket = app.connect("u1");

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_ne!(json["status"], "unhealthy");
    assert!(json["checks"]["store"]["latency_ms"].is_number());
    assert_eq!(json["checks"]["realtime"]["active_connections"], 1);
}

#[tokio::test]
async fn test_readiness_fails_when_bus_is_down() {
    let app = TestApp::without_workers().await;
    app.bus.set_available(false);

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["checks"]["bus"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readiness_fails_when_store_is_down() {
    let app = TestApp::without_workers().await;
    app.store.set_available(false);

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let app = TestApp::without_workers().await;
    app.get("/health").await;

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("relay_hub_http_requests_total"));
}

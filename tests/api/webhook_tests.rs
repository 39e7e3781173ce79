//! Delivery and Read Callback Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use relay_hub::domain::{MessageRepository, MessageStatus};

use crate::common::{body_json, sign, TestApp, WEBHOOK_SECRET};

fn delivery_body(message_id: &str) -> serde_json::Value {
    json!({
        "message_id": message_id,
        "conversation_id": "c1",
        "recipient_id": "u2",
        "timestamp": 1_700_000_000_000_i64
    })
}

fn read_body(message_id: &str) -> serde_json::Value {
    json!({
        "message_id": message_id,
        "conversation_id": "c1",
        "reader_id": "u2"
    })
}

#[tokio::test]
async fn test_signed_delivery_callback_is_applied() {
    let app = TestApp::without_workers().await;

    let response = app.post_signed("/webhooks/delivery", &delivery_body("m1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Delivery callback processed");

    let stored = app.store.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert_eq!(stored.delivered_to, vec!["u2".to_string()]);
    assert_eq!(stored.seq, None);

    let events = app.bus.records("messages.delivery");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_flipped_signature_is_rejected_without_mutation() {
    let app = TestApp::without_workers().await;
    let body = delivery_body("m1").to_string();
    let mut signature = sign(&body, WEBHOOK_SECRET).into_bytes();
    signature[0] = if signature[0] == b'0' { b'1' } else { b'0' };
    let signature = String::from_utf8(signature).unwrap();

    let response = app
        .post_webhook("/webhooks/delivery", &body, Some(&signature))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.find_by_message_id("m1").await.unwrap().is_none());
    assert!(app.bus.records("messages.delivery").is_empty());
}

#[tokio::test]
async fn test_signature_over_different_body_is_rejected() {
    let app = TestApp::without_workers().await;
    let signature = sign(&delivery_body("m1").to_string(), WEBHOOK_SECRET);

    let response = app
        .post_webhook(
            "/webhooks/delivery",
            &delivery_body("m2").to_string(),
            Some(&signature),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_callback_is_rejected_outside_development() {
    let app = TestApp::without_workers().await;

    let response = app
        .post_webhook("/webhooks/read", &read_body("m1").to_string(), None)
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_prefixed_signature_in_fallback_header() {
    let app = TestApp::without_workers().await;
    let body = read_body("m1").to_string();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/webhooks/read")
        .header("X-Signature", format!("sha256={}", sign(&body, WEBHOOK_SECRET)))
        .header("X-Channel", "WhatsApp")
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let event: serde_json::Value =
        serde_json::from_str(&app.bus.records("messages.read")[0].value).unwrap();
    assert_eq!(event["channel"], "whatsapp");
    assert_eq!(event["reader_id"], "u2");
}

#[tokio::test]
async fn test_read_before_delivery_stays_read() {
    let app = TestApp::without_workers().await;

    app.post_signed("/webhooks/read", &read_body("m1")).await;
    let response = app.post_signed("/webhooks/delivery", &delivery_body("m1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.store.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
    assert_eq!(stored.read_by, vec!["u2".to_string()]);
    assert_eq!(stored.delivered_to, vec!["u2".to_string()]);
}

#[tokio::test]
async fn test_callback_without_recipient_is_invalid() {
    let app = TestApp::without_workers().await;
    let body = json!({ "message_id": "m1", "conversation_id": "c1" });

    let response = app.post_signed("/webhooks/delivery", &body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.find_by_message_id("m1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_channel_endpoint_dispatches_by_type() {
    let app = TestApp::without_workers().await;
    let mut body = read_body("m1");
    body["type"] = json!("read");

    let response = app.post_signed("/webhooks/telegram", &body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Read callback processed");
    let stored = app.store.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn test_channel_endpoint_ignores_unknown_format() {
    let app = TestApp::without_workers().await;
    let body = json!({ "entry": [{ "changes": [] }] });

    let response = app.post_signed("/webhooks/instagram", &body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn test_callback_survives_bus_outage() {
    let app = TestApp::without_workers().await;
    app.bus.set_available(false);

    let response = app.post_signed("/webhooks/delivery", &delivery_body("m1")).await;

    // The receipt is durable in the store; the realtime notification is best-effort
    assert_eq!(response.status(), StatusCode::OK);
    let stored = app.store.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
}

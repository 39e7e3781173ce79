//! Ingest and History API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use test_case::test_case;

use crate::common::{body_json, text_message, token_for, TestApp};

#[tokio::test]
async fn test_send_requires_bearer_token() {
    let app = TestApp::without_workers().await;

    let response = app
        .post_json_auth("/api/v1/messages", &text_message("c1", "hi"), "not-a-jwt")
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.bus.records("messages.send").is_empty());
}

#[tokio::test]
async fn test_send_is_accepted_and_published() {
    let app = TestApp::without_workers().await;

    let response = app.send_message("u1", text_message("c1", "hi")).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ACCEPTED");
    let message_id = json["message_id"].as_str().unwrap().to_string();
    assert!(json["timestamp"].is_i64());

    let records = app.bus.records("messages.send");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key, "c1");
    assert_eq!(record.header("message-id"), Some(message_id.as_str()));
    assert_eq!(record.header("conversation-id"), Some("c1"));
    assert_eq!(record.header("from"), Some("u1"));

    let event: serde_json::Value = serde_json::from_str(&record.value).unwrap();
    assert_eq!(event["from"], "u1");
    assert_eq!(event["channels"], json!(["all"]));
}

#[tokio::test]
async fn test_send_keeps_client_message_id() {
    let app = TestApp::without_workers().await;
    let mut body = text_message("c1", "hi");
    body["message_id"] = json!("m-client-1");

    let response = app.send_message("u1", body).await;

    let json = body_json(response).await;
    assert_eq!(json["message_id"], "m-client-1");
}

#[tokio::test]
async fn test_send_normalizes_channels() {
    let app = TestApp::without_workers().await;
    let mut body = text_message("c1", "hi");
    body["channels"] = json!(["WhatsApp", "whatsapp", "Telegram"]);

    let response = app.send_message("u1", body).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let records = app.bus.records("messages.send");
    let event: serde_json::Value = serde_json::from_str(&records[0].value).unwrap();
    assert_eq!(event["channels"], json!(["whatsapp", "telegram"]));
}

#[test_case(json!({"payload": {"type": "text", "text": "hi"}}) ; "missing conversation")]
#[test_case(json!({"conversation_id": "  ", "payload": {"type": "text", "text": "hi"}}) ; "blank conversation")]
#[test_case(json!({"conversation_id": "c1", "payload": {"type": "text", "text": ""}}) ; "blank text")]
#[test_case(json!({"conversation_id": "c1", "payload": {"type": "sticker"}}) ; "unknown payload type")]
#[test_case(json!({"conversation_id": "c1", "channels": ["fax"], "payload": {"type": "text", "text": "hi"}}) ; "unsupported channel")]
#[tokio::test]
async fn test_send_rejects_invalid_requests(body: serde_json::Value) {
    let app = TestApp::without_workers().await;

    let response = app.send_message("u1", body).await;

    assert!(response.status().is_client_error(), "got {}", response.status());
    assert!(app.bus.records("messages.send").is_empty());
}

#[tokio::test]
async fn test_send_surfaces_bus_outage() {
    let app = TestApp::without_workers().await;
    app.bus.set_available(false);

    let response = app.send_message("u1", text_message("c1", "hi")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_history_pages_by_seq() {
    let app = TestApp::new().await;
    let mut last_id = String::new();
    for text in ["one", "two", "three"] {
        let response = app.send_message("u1", text_message("c-history", text)).await;
        last_id = body_json(response).await["message_id"]
            .as_str()
            .unwrap()
            .to_string();
    }
    app.wait_for_message(&last_id, |m| m.seq == Some(3)).await;
    let token = token_for("u1");

    let first = app
        .get_auth("/api/v1/conversations/c-history/messages?limit=2", &token)
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;
    assert_eq!(first["has_more"], true);
    assert_eq!(first["next_seq"], 2);
    let seqs: Vec<i64> = first["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2]);

    let second = app
        .get_auth(
            "/api/v1/conversations/c-history/messages?limit=2&since_seq=2",
            &token,
        )
        .await;
    let second = body_json(second).await;
    assert_eq!(second["has_more"], false);
    assert_eq!(second["next_seq"], 3);
    assert_eq!(second["messages"][0]["payload"]["text"], "three");
}

#[tokio::test]
async fn test_history_requires_auth() {
    let app = TestApp::without_workers().await;

    let response = app.get("/api/v1/conversations/c1/messages").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

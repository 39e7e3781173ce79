//! Realtime fan-out of pipeline events to joined connections

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::{next_frame, text_message, TestApp};

#[tokio::test]
async fn test_ingest_event_reaches_recipient_and_sender() {
    let app = TestApp::new().await;
    let mut recipient = app.connect("u2");
    let mut sender = app.connect("u1");

    app.send_message("u1", text_message("c1", "hi")).await;

    let frame = next_frame(&mut recipient, "messages.send").await;
    assert_eq!(frame["event"]["conversation_id"], "c1");
    assert_eq!(frame["event"]["payload"]["text"], "hi");
    next_frame(&mut sender, "messages.send").await;
}

#[tokio::test]
async fn test_read_receipt_is_pushed_to_reader() {
    let app = TestApp::new().await;
    let mut reader = app.connect("u7");

    app.post_signed(
        "/webhooks/read",
        &json!({ "message_id": "m1", "conversation_id": "c1", "reader_id": "u7" }),
    )
    .await;

    let frame = next_frame(&mut reader, "messages.read").await;
    assert_eq!(frame["event"]["message_id"], "m1");
    assert_eq!(frame["event"]["status"], "READ");
}

#[tokio::test]
async fn test_every_connection_of_a_user_receives_the_frame() {
    let app = TestApp::new().await;
    let mut phone = app.connect("u2");
    let mut laptop = app.connect("u2");
    assert_eq!(app.state.gateway.connections_of("u2"), 2);

    app.send_message("u1", text_message("c1", "hi")).await;

    next_frame(&mut phone, "messages.send").await;
    next_frame(&mut laptop, "messages.send").await;
}

#[tokio::test]
async fn test_unrelated_user_receives_nothing() {
    let app = TestApp::new().await;
    let mut bystander = app.connect("u9");
    let mut recipient = app.connect("u2");

    app.send_message("u1", text_message("c1", "hi")).await;
    next_frame(&mut recipient, "messages.delivery").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bystander.try_recv().is_err());
}

#[tokio::test]
async fn test_external_read_receipt_reaches_sender() {
    let app = TestApp::new().await;
    let mut body = text_message("c8", "seen?");
    body["message_id"] = json!("m-seen");
    app.send_message("u1", body).await;
    app.wait_for_message("m-seen", |m| m.seq.is_some()).await;

    let mut sender = app.connect("u1");
    app.post_signed(
        "/webhooks/read",
        &json!({ "message_id": "m-seen", "conversation_id": "c8", "reader_id": "u2" }),
    )
    .await;

    let frame = next_frame(&mut sender, "messages.read").await;
    assert_eq!(frame["event"]["message_id"], "m-seen");
    assert_eq!(frame["event"]["from"], "u1");
    assert_eq!(frame["event"]["reader_id"], "u2");
}

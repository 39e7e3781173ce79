//! Ingest -> sequencer -> router flows over the in-memory backends

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use relay_hub::application::services::Sequencer;
use relay_hub::domain::{ChannelAddress, Destination, MessageRepository, MessageStatus};
use relay_hub::infrastructure::bus::RecordHandler;
use relay_hub::infrastructure::channels::{ChannelRegistry, LoopbackAdapter};

use crate::common::{
    body_json, next_frame, test_settings, text_message, FailingAdapter, TestApp,
};

async fn send(app: &TestApp, body: serde_json::Value) -> String {
    let response = app.send_message("u1", body).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["message_id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_single_message_is_persisted_routed_and_pushed() {
    let app = TestApp::new().await;
    let mut recipient = app.connect("u2");
    let mut sender = app.connect("u1");
    let mut body = text_message("c1", "hi");
    body["message_id"] = json!("m1");
    body["channels"] = json!(["whatsapp"]);

    let message_id = send(&app, body).await;
    assert_eq!(message_id, "m1");

    let stored = app
        .wait_for_message("m1", |m| m.status == MessageStatus::Delivered)
        .await;
    assert_eq!(stored.seq, Some(1));
    assert_eq!(stored.from.as_deref(), Some("u1"));
    assert_eq!(stored.per_channel_delivery.len(), 1);
    assert_eq!(stored.per_channel_delivery[0].channel, "whatsapp");
    assert_eq!(stored.per_channel_delivery[0].target, "u2");

    let frame = next_frame(&mut recipient, "messages.delivery").await;
    assert_eq!(frame["event"]["message_id"], "m1");
    assert_eq!(frame["event"]["status"], "DELIVERED");
    let frame = next_frame(&mut sender, "messages.delivery").await;
    assert_eq!(frame["event"]["message_id"], "m1");
}

#[tokio::test]
async fn test_resent_message_is_not_sequenced_twice() {
    let app = TestApp::new().await;
    let mut body = text_message("c1", "hi");
    body["message_id"] = json!("m1");

    send(&app, body.clone()).await;
    send(&app, body).await;
    // Same conversation, same partition: m2 is handled after both copies of m1
    let mut follow_up = text_message("c1", "after");
    follow_up["message_id"] = json!("m2");
    send(&app, follow_up).await;

    let m2 = app
        .wait_for_message("m2", |m| m.status == MessageStatus::Delivered)
        .await;
    assert_eq!(m2.seq, Some(2));

    let m1 = app.store.find_by_message_id("m1").await.unwrap().unwrap();
    assert_eq!(m1.seq, Some(1));
    assert_eq!(m1.per_channel_delivery.len(), 1);
    assert_eq!(app.store.count_by_conversation("c1").await.unwrap(), 2);
    assert_eq!(app.bus.records("messages.routing").len(), 2);
}

#[tokio::test]
async fn test_serial_messages_get_increasing_seq() {
    let app = TestApp::new().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(send(&app, text_message("c-serial", &format!("msg {}", i))).await);
    }

    let last = ids.last().unwrap().clone();
    app.wait_for_message(&last, |m| m.seq.is_some()).await;

    let mut seqs = Vec::new();
    for id in &ids {
        let message = app.store.find_by_message_id(id).await.unwrap().unwrap();
        seqs.push(message.seq.unwrap());
    }
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_failed_channel_does_not_block_other_destination() {
    let registry = ChannelRegistry::new()
        .with_adapter("whatsapp", Arc::new(LoopbackAdapter::new("whatsapp")))
        .with_adapter("instagram", Arc::new(FailingAdapter));
    let app = TestApp::with_channels(registry).await;
    let body = json!({
        "message_id": "m-fanout",
        "conversation_id": "c2",
        "payload": { "type": "text", "text": "hello both" },
        "to": [
            { "user_id": "u2", "channels": [{ "channel": "whatsapp", "channel_user_id": "+5511" }] },
            { "user_id": "u3", "channels": [{ "channel": "instagram", "channel_user_id": "@u3" }] }
        ]
    });

    send(&app, body).await;

    let stored = app
        .wait_for_message("m-fanout", |m| m.per_channel_delivery.len() == 2)
        .await;
    assert_eq!(stored.status, MessageStatus::Delivered);
    let mut outcomes: Vec<(String, String, MessageStatus)> = stored
        .per_channel_delivery
        .iter()
        .map(|a| (a.channel.clone(), a.target.clone(), a.status))
        .collect();
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        outcomes,
        vec![
            ("instagram".to_string(), "@u3".to_string(), MessageStatus::Failed),
            ("whatsapp".to_string(), "+5511".to_string(), MessageStatus::Delivered),
        ]
    );
}

#[tokio::test]
async fn test_all_channels_failing_marks_message_failed() {
    let registry =
        ChannelRegistry::new().with_adapter("whatsapp", Arc::new(FailingAdapter));
    let app = TestApp::with_channels(registry).await;
    let mut body = text_message("c3", "nobody home");
    body["message_id"] = json!("m-failed");

    send(&app, body).await;

    let stored = app
        .wait_for_message("m-failed", |m| m.status == MessageStatus::Failed)
        .await;
    assert_eq!(stored.per_channel_delivery.len(), 1);
    // No success, nothing announced on the delivery topic
    assert!(app.bus.records("messages.delivery").is_empty());
}

#[tokio::test]
async fn test_recipients_resolved_from_directory() {
    let app = TestApp::new().await;
    app.directory.set_members(
        "c-group",
        vec![
            Destination::new("u1", vec![ChannelAddress::new("telegram", None)]),
            Destination::new("u4", vec![ChannelAddress::new("telegram", Some("tg-u4".into()))]),
        ],
    );
    let body = json!({
        "message_id": "m-group",
        "conversation_id": "c-group",
        "payload": { "type": "text", "text": "hi group" }
    });

    send(&app, body).await;

    let stored = app
        .wait_for_message("m-group", |m| m.status == MessageStatus::Delivered)
        .await;
    let targets: Vec<&str> = stored
        .per_channel_delivery
        .iter()
        .map(|a| a.target.as_str())
        .collect();
    assert_eq!(targets, vec!["tg-u4"]);
}

#[tokio::test]
async fn test_store_outage_is_retried() {
    let app = TestApp::new().await;
    app.store.set_available(false);
    let mut body = text_message("c4", "eventually");
    body["message_id"] = json!("m-retry");

    send(&app, body).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(app.bus.records("messages.routing").is_empty());
    app.store.set_available(true);

    let stored = app
        .wait_for_message("m-retry", |m| m.status == MessageStatus::Delivered)
        .await;
    assert_eq!(stored.seq, Some(1));
}

#[tokio::test]
async fn test_receipt_before_persistence_is_merged() {
    let app = TestApp::new().await;
    let receipt = json!({
        "message_id": "m-early",
        "conversation_id": "c5",
        "reader_id": "u2"
    });
    app.post_signed("/webhooks/read", &receipt).await;

    let mut body = text_message("c5", "late");
    body["message_id"] = json!("m-early");
    send(&app, body).await;

    let stored = app
        .wait_for_message("m-early", |m| m.per_channel_delivery.len() == 1)
        .await;
    assert_eq!(stored.seq, Some(1));
    assert_eq!(stored.status, MessageStatus::Read);
    assert_eq!(stored.read_by, vec!["u2".to_string()]);
}

#[tokio::test]
async fn test_stopped_workers_consume_nothing() {
    let mut app = TestApp::new().await;
    app.stop_workers().await;

    let mut body = text_message("c7", "after stop");
    body["message_id"] = json!("m-idle");
    send(&app, body).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(app.bus.records("messages.send").len(), 1);
    assert!(app.store.find_by_message_id("m-idle").await.unwrap().is_none());
    assert!(app.bus.records("messages.routing").is_empty());
}

#[tokio::test]
async fn test_restarted_consumer_does_not_resequence() {
    let app = TestApp::without_workers().await;
    let mut body = text_message("c6", "before crash");
    body["message_id"] = json!("m1");
    send(&app, body).await;

    // Persisted and routed, but the ingest record is never committed
    let sequencer = Sequencer::new(
        app.store.clone(),
        app.bus.clone(),
        app.settings().bus.topics.routing.clone(),
    );
    let ingest = app.bus.records("messages.send").remove(0);
    sequencer.handle(&ingest).await.unwrap();
    assert_eq!(app.bus.records("messages.routing").len(), 1);

    let app = app.restart(test_settings()).await;
    // Same conversation, same partition: m2 is sequenced after m1 is redelivered
    let mut follow_up = text_message("c6", "after restart");
    follow_up["message_id"] = json!("m2");
    send(&app, follow_up).await;

    let m2 = app
        .wait_for_message("m2", |m| m.status == MessageStatus::Delivered)
        .await;
    assert_eq!(m2.seq, Some(2));
    let m1 = app
        .wait_for_message("m1", |m| m.status == MessageStatus::Delivered)
        .await;
    assert_eq!(m1.seq, Some(1));
    assert_eq!(m1.per_channel_delivery.len(), 1);
    assert_eq!(app.store.count_by_conversation("c6").await.unwrap(), 2);
    assert_eq!(app.bus.records("messages.routing").len(), 2);
}

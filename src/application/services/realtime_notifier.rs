//! Realtime Notifier
//!
//! Broadcast consumer of the send, delivery and read topics. Every event is
//! pushed verbatim to the live connections of the users it concerns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::infrastructure::bus::{BusRecord, RecordHandler};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Process-local registry of open client connections.
pub trait ConnectionRegistry: Send + Sync {
    /// Queue `frame` on every connection joined as `user_id`; returns how
    /// many connections it was queued on.
    fn push_to_user(&self, user_id: &str, frame: &str) -> usize;
}

/// Fields naming a single user on any pipeline event
const USER_FIELDS: [&str; 4] = ["user_id", "recipient_id", "reader_id", "from"];

/// Users an event concerns: the `to` field (a user id, a list of ids, or a
/// list of destinations), destination user ids, receipt actors and the
/// sender. Order of first appearance, without duplicates.
pub fn target_users(event: &Value) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let mut add = |user: Option<&str>| {
        if let Some(user) = user.map(str::trim).filter(|u| !u.is_empty()) {
            if !targets.iter().any(|t| t == user) {
                targets.push(user.to_string());
            }
        }
    };

    let listed = |value: &Value| -> Vec<Option<String>> {
        match value {
            Value::String(user) => vec![Some(user.clone())],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(user) => Some(user.clone()),
                    Value::Object(destination) => destination
                        .get("user_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    };

    for field in ["to", "destinations"] {
        if let Some(value) = event.get(field) {
            for user in listed(value) {
                add(user.as_deref());
            }
        }
    }
    for field in USER_FIELDS {
        add(event.get(field).and_then(Value::as_str));
    }

    targets
}

pub struct RealtimeNotifier {
    connections: Arc<dyn ConnectionRegistry>,
}

impl RealtimeNotifier {
    pub fn new(connections: Arc<dyn ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Push one event to its target users; returns the frames queued.
    pub fn notify(&self, topic: &str, event: Value) -> usize {
        let targets = target_users(&event);
        if targets.is_empty() {
            return 0;
        }
        let frame = json!({ "topic": topic, "event": event }).to_string();
        let pushed: usize = targets
            .iter()
            .map(|user| self.connections.push_to_user(user, &frame))
            .sum();
        for _ in 0..pushed {
            metrics::record_realtime_frame(topic);
        }
        pushed
    }
}

#[async_trait]
impl RecordHandler for RealtimeNotifier {
    #[instrument(skip_all, fields(topic = %record.topic, record_id = %record.id))]
    async fn handle(&self, record: &BusRecord) -> Result<(), AppError> {
        let event: Value = serde_json::from_str(&record.value)
            .map_err(|e| AppError::Validation(format!("malformed event: {}", e)))?;
        let pushed = self.notify(&record.topic, event);
        debug!(pushed, "Event broadcast to live connections");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        online: Vec<&'static str>,
        frames: Mutex<Vec<(String, String)>>,
    }

    impl ConnectionRegistry for Recorder {
        fn push_to_user(&self, user_id: &str, frame: &str) -> usize {
            if !self.online.iter().any(|online| *online == user_id) {
                return 0;
            }
            self.frames.lock().push((user_id.to_string(), frame.to_string()));
            1
        }
    }

    #[test]
    fn test_targets_from_router_delivery_event() {
        let event = json!({
            "message_id": "m1",
            "conversation_id": "c1",
            "from": "u1",
            "to": "u2",
            "status": "DELIVERED",
            "channel": "whatsapp"
        });
        assert_eq!(target_users(&event), vec!["u2", "u1"]);
    }

    #[test]
    fn test_targets_from_ingest_event_destinations() {
        let event = json!({
            "from": "u1",
            "to": [{"user_id": "u2", "channels": []}, {"user_id": "u3"}, "u2"]
        });
        assert_eq!(target_users(&event), vec!["u2", "u3", "u1"]);
    }

    #[test]
    fn test_targets_from_receipts() {
        assert_eq!(target_users(&json!({"reader_id": "u2"})), vec!["u2"]);
        assert_eq!(target_users(&json!({"recipient_id": "u3", "from": ""})), vec!["u3"]);
        assert!(target_users(&json!({"message_id": "m1"})).is_empty());
    }

    #[tokio::test]
    async fn test_event_is_pushed_verbatim_to_online_users() {
        let recorder = Arc::new(Recorder {
            online: vec!["u1", "u2"],
            ..Default::default()
        });
        let notifier = RealtimeNotifier::new(recorder.clone());
        let event = json!({"message_id": "m1", "from": "u1", "to": "u2", "status": "DELIVERED"});
        let record = BusRecord {
            topic: "messages.delivery".into(),
            partition: 0,
            id: "0".into(),
            key: "c1".into(),
            value: event.to_string(),
            headers: HashMap::new(),
        };

        notifier.handle(&record).await.unwrap();

        let frames = recorder.frames.lock();
        assert_eq!(frames.len(), 2);
        let frame: Value = serde_json::from_str(&frames[0].1).unwrap();
        assert_eq!(frame["topic"], "messages.delivery");
        assert_eq!(frame["event"], event);
    }

    #[tokio::test]
    async fn test_offline_users_miss_the_update() {
        let recorder = Arc::new(Recorder::default());
        let notifier = RealtimeNotifier::new(recorder.clone());
        assert_eq!(notifier.notify("messages.read", json!({"reader_id": "u9"})), 0);
    }
}

//! Pipeline events carried on the message bus.
//!
//! All timestamps are epoch milliseconds. Field names are the bus wire
//! format and are shared with external consumers of the topics.

use serde::{Deserialize, Serialize};

use super::{Destination, Message, MessageStatus, Metadata, Payload};

/// Ingest and routing event.
///
/// Published without `seq`/`status` by the ingest publisher; the sequencer
/// republishes it enriched with both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: String,
    pub conversation_id: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<Destination>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl MessageEvent {
    /// Structural checks a consumer applies before touching the store.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.message_id.trim().is_empty() {
            Some("message_id")
        } else if self.conversation_id.trim().is_empty() {
            Some("conversation_id")
        } else if self.from.trim().is_empty() {
            Some("from")
        } else {
            None
        }
    }

    /// Build the canonical record for a freshly sequenced message.
    pub fn to_message(&self, status: MessageStatus) -> Message {
        let now = chrono::Utc::now();
        Message {
            message_id: self.message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            from: Some(self.from.clone()),
            to: self.to.clone(),
            channels: self.channels.clone(),
            payload: Some(self.payload.clone()),
            metadata: self.metadata.clone(),
            seq: None,
            status,
            per_channel_delivery: Vec::new(),
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
            delivered_at: None,
            read_at: None,
        }
    }

    /// Copy enriched with the assigned sequence number and status.
    pub fn sequenced(&self, seq: i64, status: MessageStatus) -> Self {
        Self {
            seq: Some(seq),
            status: Some(status),
            ..self.clone()
        }
    }
}

/// Delivery outcome, from the router or from a delivery receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub message_id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Destination user id (router path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Receipt recipient (webhook path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub status: MessageStatus,
    pub channel: String,
    pub timestamp: i64,
}

/// Read receipt event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadEvent {
    pub message_id: String,
    pub conversation_id: String,
    /// Sender of the message that was read, when the store knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub reader_id: String,
    pub status: MessageStatus,
    pub channel: String,
    pub timestamp: i64,
}

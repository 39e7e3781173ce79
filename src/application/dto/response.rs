//! Response DTOs
//!
//! Data structures for API response bodies.

use serde::Serialize;

use crate::application::services::PublishReceipt;
use crate::domain::{Message, MessageStatus};

/// Synchronous answer to a send: accepted, not yet delivered
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub message_id: String,
    pub status: MessageStatus,
    pub timestamp: i64,
}

impl From<PublishReceipt> for AcceptedResponse {
    fn from(receipt: PublishReceipt) -> Self {
        Self {
            message_id: receipt.message_id,
            status: receipt.status,
            timestamp: receipt.timestamp,
        }
    }
}

/// One page of conversation history
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_seq: Option<i64>,
}

/// Webhook acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub message: String,
}

impl WebhookAck {
    pub fn processed(kind: &str) -> Self {
        Self {
            status: "success",
            message: format!("{} callback processed", capitalize(kind)),
        }
    }

    pub fn ignored(channel: &str) -> Self {
        Self {
            status: "ignored",
            message: format!("Unrecognized callback for channel {}", channel),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! Request DTOs
//!
//! Data structures for API request bodies.

use serde::Deserialize;
use validator::Validate;

use crate::domain::{Destination, Metadata, Payload};
use crate::shared::validation::not_blank;

/// Send message request. The sender comes from the bearer token.
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(max = 128, message = "message_id must be at most 128 characters"))]
    pub message_id: Option<String>,

    #[validate(
        custom(function = "not_blank"),
        length(max = 128, message = "conversation_id must be at most 128 characters")
    )]
    pub conversation_id: String,

    #[validate(length(max = 16, message = "At most 16 channels per message"))]
    pub channels: Option<Vec<String>>,

    pub payload: Payload,

    pub metadata: Option<Metadata>,

    #[validate(length(max = 256, message = "At most 256 destinations per message"))]
    pub to: Option<Vec<Destination>>,
}

/// Delivery receipt posted by a channel
#[derive(Debug, Deserialize, Validate)]
pub struct DeliveryCallbackRequest {
    #[validate(custom(function = "not_blank"))]
    pub message_id: String,

    #[validate(custom(function = "not_blank"))]
    pub conversation_id: String,

    #[validate(custom(function = "not_blank"))]
    pub recipient_id: String,

    /// Informational; the receipt kind decides the target status
    pub status: Option<String>,

    /// Epoch milliseconds; receive time when absent
    pub timestamp: Option<i64>,

    pub metadata: Option<serde_json::Value>,
}

/// Read receipt posted by a channel
#[derive(Debug, Deserialize, Validate)]
pub struct ReadCallbackRequest {
    #[validate(custom(function = "not_blank"))]
    pub message_id: String,

    #[validate(custom(function = "not_blank"))]
    pub conversation_id: String,

    #[validate(custom(function = "not_blank"))]
    pub reader_id: String,

    pub status: Option<String>,

    pub timestamp: Option<i64>,

    pub metadata: Option<serde_json::Value>,
}

/// Conversation history query
#[derive(Debug, Default, Deserialize, Validate)]
pub struct HistoryParams {
    #[validate(range(min = 0, message = "since_seq must not be negative"))]
    pub since_seq: Option<i64>,

    #[validate(range(min = 1, message = "until_seq must be positive"))]
    pub until_seq: Option<i64>,

    pub limit: Option<i64>,

    /// Newest first when true
    #[serde(default)]
    pub reverse: bool,
}

impl HistoryParams {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    /// Requested page size clamped to `1..=MAX_LIMIT`.
    pub fn page_size(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

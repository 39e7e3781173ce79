//! Channel adapter capability interface.
//!
//! An adapter performs the actual hand-off of one message to one external
//! channel. Adapters are registered by channel name and looked up by the
//! delivery router; transport details stay behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{MessageStatus, Metadata};

/// Text-like send request (text, location and contact payloads).
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageCommand {
    pub conversation_id: String,
    pub message_id: String,
    pub from: String,
    /// Channel-specific address of the destination
    pub to: String,
    pub text: Option<String>,
    pub metadata: Metadata,
}

/// File send request.
#[derive(Debug, Clone, PartialEq)]
pub struct SendFileCommand {
    pub conversation_id: String,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub file_url: String,
    pub mime_type: String,
    pub size: u64,
    pub metadata: Metadata,
}

/// Status an adapter reports for one hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterStatus {
    Delivered,
    Sent,
    Failed,
}

impl From<AdapterStatus> for MessageStatus {
    fn from(status: AdapterStatus) -> Self {
        match status {
            AdapterStatus::Delivered => MessageStatus::Delivered,
            AdapterStatus::Sent => MessageStatus::Sent,
            AdapterStatus::Failed => MessageStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOutcome {
    pub status: AdapterStatus,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl AdapterOutcome {
    pub fn delivered(at: DateTime<Utc>) -> Self {
        Self {
            status: AdapterStatus::Delivered,
            delivered_at: Some(at),
        }
    }

    pub fn sent() -> Self {
        Self {
            status: AdapterStatus::Sent,
            delivered_at: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: AdapterStatus::Failed,
            delivered_at: None,
        }
    }
}

/// Errors raised by an adapter call. The router records them as `FAILED`
/// for the affected pair only.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by channel: {0}")]
    Rejected(String),

    #[error("adapter call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Pluggable integration with one external messaging channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send_message(&self, command: &SendMessageCommand)
        -> Result<AdapterOutcome, AdapterError>;

    async fn send_file(&self, command: &SendFileCommand) -> Result<AdapterOutcome, AdapterError>;
}

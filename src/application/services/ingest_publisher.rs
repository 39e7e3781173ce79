//! Ingest Publisher
//!
//! Validates an outbound message request and publishes it onto the ingest
//! topic, partitioned by conversation. Never touches the message store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::{
    new_message_id, partition_for, Destination, MessageEvent, MessageStatus, Metadata, Payload,
    ALL_CHANNELS,
};
use crate::infrastructure::bus::{headers, MessageBus, OutboundRecord};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// A message to publish on behalf of an authenticated sender.
#[derive(Debug, Clone)]
pub struct PublishCommand {
    pub message_id: Option<String>,
    pub conversation_id: String,
    pub from: String,
    pub channels: Option<Vec<String>>,
    pub payload: Payload,
    pub metadata: Option<Metadata>,
    pub to: Option<Vec<Destination>>,
}

/// Synchronous result of a publish: the message is accepted, not yet sequenced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub message_id: String,
    pub status: MessageStatus,
    pub timestamp: i64,
}

pub struct IngestPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    enabled_channels: HashSet<String>,
}

impl IngestPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, channels: &[String]) -> Self {
        Self {
            bus,
            topic: topic.into(),
            enabled_channels: channels.iter().map(|c| c.to_lowercase()).collect(),
        }
    }

    /// Lower-case the requested channels, defaulting to `all`.
    fn normalize_channels(&self, channels: Option<Vec<String>>) -> Result<Vec<String>, AppError> {
        let mut normalized: Vec<String> = Vec::new();
        for channel in channels.unwrap_or_default() {
            let channel = channel.trim().to_lowercase();
            if channel.is_empty() || normalized.contains(&channel) {
                continue;
            }
            if channel != ALL_CHANNELS && !self.enabled_channels.contains(&channel) {
                return Err(AppError::Validation(format!("Unsupported channel: {}", channel)));
            }
            normalized.push(channel);
        }
        if normalized.is_empty() {
            normalized.push(ALL_CHANNELS.to_string());
        }
        Ok(normalized)
    }

    /// Validate and publish; returns once the bus acknowledged the write.
    #[instrument(skip(self, command), fields(conversation_id = %command.conversation_id, from = %command.from))]
    pub async fn publish(&self, command: PublishCommand) -> Result<PublishReceipt, AppError> {
        if command.conversation_id.trim().is_empty() {
            return Err(AppError::Validation("conversation_id: must not be blank".into()));
        }
        if command.from.trim().is_empty() {
            return Err(AppError::Validation("from: must not be blank".into()));
        }
        command
            .payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let channels = self.normalize_channels(command.channels)?;

        let message_id = command
            .message_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_message_id);
        let timestamp = Utc::now().timestamp_millis();

        let event = MessageEvent {
            message_id: message_id.clone(),
            conversation_id: command.conversation_id.clone(),
            from: command.from.clone(),
            to: command.to.unwrap_or_default(),
            channels,
            payload: command.payload,
            metadata: command.metadata.unwrap_or_default(),
            timestamp,
            seq: None,
            status: None,
        };

        let partition = partition_for(&event.conversation_id, self.bus.partitions());
        let record = OutboundRecord::json(&event.conversation_id, &event)?
            .with_partition(partition)
            .with_header(headers::MESSAGE_ID, &message_id)
            .with_header(headers::CONVERSATION_ID, &event.conversation_id)
            .with_header(headers::FROM, &event.from)
            .with_header(headers::TIMESTAMP, timestamp.to_string());

        match self.bus.publish(&self.topic, record).await {
            Ok(()) => metrics::record_published(&self.topic, true),
            Err(e) => {
                metrics::record_published(&self.topic, false);
                warn!(message_id = %message_id, error = %e, "Ingest publish failed");
                return Err(e.into());
            }
        }

        info!(
            message_id = %message_id,
            partition,
            payload = event.payload.type_name(),
            "Message accepted"
        );
        Ok(PublishReceipt {
            message_id,
            status: MessageStatus::Accepted,
            timestamp,
        })
    }
}

//! Sequencer / Persister
//!
//! Consumes the ingest topic one record at a time per partition, assigns the
//! per-conversation sequence number, persists the canonical record and
//! republishes the enriched event onto the routing topic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use crate::domain::{MessageEvent, MessageRepository, MessageStatus, PersistOutcome};
use crate::infrastructure::bus::{headers, BusRecord, MessageBus, OutboundRecord, RecordHandler};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

pub struct Sequencer {
    messages: Arc<dyn MessageRepository>,
    bus: Arc<dyn MessageBus>,
    routing_topic: String,
}

impl Sequencer {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        bus: Arc<dyn MessageBus>,
        routing_topic: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            bus,
            routing_topic: routing_topic.into(),
        }
    }

    fn parse(record: &BusRecord) -> Result<MessageEvent, AppError> {
        let event: MessageEvent = serde_json::from_str(&record.value)
            .map_err(|e| AppError::Validation(format!("malformed ingest event: {}", e)))?;
        if let Some(field) = event.missing_field() {
            return Err(AppError::Validation(format!("ingest event without {}", field)));
        }
        event
            .payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(event)
    }

    /// Persist one ingest event. Returns the seq assigned, or `None` when the
    /// message was already persisted.
    pub async fn persist(&self, event: &MessageEvent) -> Result<Option<(i64, MessageStatus)>, AppError> {
        if let Some(existing) = self.messages.find_by_message_id(&event.message_id).await? {
            if let Some(seq) = existing.seq {
                debug!(message_id = %event.message_id, seq, "Duplicate ingest event skipped");
                metrics::record_persisted("duplicate");
                return Ok(None);
            }
        }

        match self
            .messages
            .insert_sequenced(&event.to_message(MessageStatus::Sent))
            .await?
        {
            PersistOutcome::Inserted { seq, status } => {
                metrics::record_persisted("inserted");
                info!(message_id = %event.message_id, conversation_id = %event.conversation_id, seq, "Message persisted");
                Ok(Some((seq, status)))
            }
            PersistOutcome::Duplicate { seq } => {
                debug!(message_id = %event.message_id, seq, "Duplicate detected at write");
                metrics::record_persisted("duplicate");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl RecordHandler for Sequencer {
    #[instrument(skip(self, record), fields(partition = record.partition, record_id = %record.id))]
    async fn handle(&self, record: &BusRecord) -> Result<(), AppError> {
        let event = match Self::parse(record) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_persisted("dropped");
                return Err(e);
            }
        };

        let Some((seq, status)) = self.persist(&event).await? else {
            return Ok(());
        };

        let routed = event.sequenced(seq, status);
        let outbound = OutboundRecord::json(&routed.conversation_id, &routed)?
            .with_header(headers::MESSAGE_ID, &routed.message_id)
            .with_header(headers::CONVERSATION_ID, &routed.conversation_id)
            .with_header(headers::FROM, &routed.from)
            .with_header(headers::TIMESTAMP, routed.timestamp.to_string());

        if let Err(e) = self.bus.publish(&self.routing_topic, outbound).await {
            metrics::record_published(&self.routing_topic, false);
            // A redelivery hits the dedup check, so this routing event is lost.
            error!(message_id = %routed.message_id, seq, error = %e, "Routing publish failed after persist");
            return Err(e.into());
        }
        metrics::record_published(&self.routing_topic, true);
        Ok(())
    }
}

//! Delivery Router
//!
//! Consumes the routing topic, fans each sequenced message out to every
//! (destination, channel) pair concurrently, records per-pair outcomes and
//! the aggregate status, and emits one delivery event per successful pair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AdapterError, AdapterOutcome, AdapterStatus, ChannelAdapter, DeliveryAttempt, DeliveryEvent,
    DeliveryPair, DeliveryPlanner, MessageEvent, MessageKey, MessageRepository, MessageStatus,
    RecipientDirectory, SendFileCommand, SendMessageCommand,
};
use crate::infrastructure::bus::{headers, BusRecord, MessageBus, OutboundRecord, RecordHandler};
use crate::infrastructure::channels::ChannelRegistry;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Result of one pair's hand-off.
#[derive(Debug)]
struct PairOutcome {
    pair: DeliveryPair,
    status: AdapterStatus,
    at: DateTime<Utc>,
    recorded: Result<(), AppError>,
}

pub struct DeliveryRouter {
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn RecipientDirectory>,
    registry: ChannelRegistry,
    bus: Arc<dyn MessageBus>,
    delivery_topic: String,
    adapter_timeout: Duration,
}

impl DeliveryRouter {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn RecipientDirectory>,
        registry: ChannelRegistry,
        bus: Arc<dyn MessageBus>,
        delivery_topic: impl Into<String>,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            messages,
            directory,
            registry,
            bus,
            delivery_topic: delivery_topic.into(),
            adapter_timeout,
        }
    }

    /// Hand the message to one adapter, bounded by the adapter timeout.
    async fn call_adapter(
        &self,
        adapter: &dyn ChannelAdapter,
        event: &MessageEvent,
        pair: &DeliveryPair,
    ) -> Result<AdapterOutcome, AdapterError> {
        let call = async {
            match event.payload.file() {
                Some(file) => {
                    let command = SendFileCommand {
                        conversation_id: event.conversation_id.clone(),
                        message_id: event.message_id.clone(),
                        from: event.from.clone(),
                        to: pair.target.clone(),
                        file_url: file.url.clone().unwrap_or_else(|| file.file_id.clone()),
                        mime_type: file
                            .mime_type
                            .clone()
                            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                        size: file.size.unwrap_or(0),
                        metadata: event.metadata.clone(),
                    };
                    adapter.send_file(&command).await
                }
                None => {
                    let command = SendMessageCommand {
                        conversation_id: event.conversation_id.clone(),
                        message_id: event.message_id.clone(),
                        from: event.from.clone(),
                        to: pair.target.clone(),
                        text: event.payload.as_text(),
                        metadata: event.metadata.clone(),
                    };
                    adapter.send_message(&command).await
                }
            }
        };

        tokio::time::timeout(self.adapter_timeout, call)
            .await
            .unwrap_or(Err(AdapterError::Timeout(self.adapter_timeout)))
    }

    /// Deliver one pair and record the attempt. Never fails the fan-out.
    async fn deliver(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        event: &MessageEvent,
        key: &MessageKey,
        pair: DeliveryPair,
    ) -> PairOutcome {
        let started = Instant::now();
        let outcome = match self.call_adapter(adapter.as_ref(), event, &pair).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    message_id = %event.message_id,
                    channel = %pair.channel,
                    user_id = %pair.user_id,
                    error = %e,
                    "Adapter call failed"
                );
                AdapterOutcome::failed()
            }
        };
        let status = MessageStatus::from(outcome.status);
        metrics::record_delivery_attempt(
            &pair.channel,
            status.as_str(),
            started.elapsed().as_secs_f64(),
        );

        let at = outcome.delivered_at.unwrap_or_else(Utc::now);
        let attempt = DeliveryAttempt {
            channel: pair.channel.clone(),
            target: pair.target.clone(),
            status,
            timestamp: at,
        };
        let recorded = self.messages.append_delivery_attempt(key, &attempt).await;
        if let Err(e) = &recorded {
            warn!(message_id = %key.message_id, channel = %pair.channel, error = %e, "Failed to record delivery attempt");
        }

        PairOutcome {
            pair,
            status: outcome.status,
            at,
            recorded,
        }
    }

    async fn publish_delivered(&self, event: &MessageEvent, outcome: &PairOutcome) {
        let delivered = DeliveryEvent {
            message_id: event.message_id.clone(),
            conversation_id: event.conversation_id.clone(),
            from: Some(event.from.clone()),
            to: Some(outcome.pair.user_id.clone()),
            recipient_id: None,
            status: outcome.status.into(),
            channel: outcome.pair.channel.clone(),
            timestamp: outcome.at.timestamp_millis(),
        };
        let record = match OutboundRecord::json(&delivered.conversation_id, &delivered) {
            Ok(record) => record
                .with_header(headers::MESSAGE_ID, &delivered.message_id)
                .with_header(headers::CONVERSATION_ID, &delivered.conversation_id),
            Err(e) => {
                warn!(message_id = %delivered.message_id, error = %e, "Failed to encode delivery event");
                return;
            }
        };
        match self.bus.publish(&self.delivery_topic, record).await {
            Ok(()) => metrics::record_published(&self.delivery_topic, true),
            Err(e) => {
                metrics::record_published(&self.delivery_topic, false);
                warn!(message_id = %delivered.message_id, channel = %delivered.channel, error = %e, "Delivery event not published");
            }
        }
    }

    /// Fan a sequenced message out to every deliverable pair.
    pub async fn route(&self, event: &MessageEvent) -> Result<Option<MessageStatus>, AppError> {
        let destinations = if event.to.is_empty() {
            self.directory
                .recipients(&event.conversation_id, &event.from)
                .await?
        } else {
            event.to.clone()
        };

        let mut deliverable = Vec::new();
        for pair in DeliveryPlanner::plan(&destinations, &event.channels) {
            match self.registry.get(&pair.channel) {
                Some(adapter) => deliverable.push((adapter, pair)),
                None => warn!(
                    message_id = %event.message_id,
                    channel = %pair.channel,
                    "No adapter registered for channel; pair skipped"
                ),
            }
        }

        if deliverable.is_empty() {
            info!(message_id = %event.message_id, "No deliverable destinations");
            return Ok(None);
        }

        let key = MessageKey::new(&event.message_id, &event.conversation_id);
        let outcomes = join_all(
            deliverable
                .into_iter()
                .map(|(adapter, pair)| self.deliver(adapter, event, &key, pair)),
        )
        .await;

        let statuses: Vec<AdapterStatus> = outcomes.iter().map(|o| o.status).collect();
        let aggregate = match DeliveryPlanner::aggregate(&statuses) {
            Some(target) => {
                let at = outcomes.iter().map(|o| o.at).max().unwrap_or_else(Utc::now);
                self.messages.advance_status(&key, target, at).await?
            }
            None => None,
        };

        for outcome in outcomes.iter().filter(|o| o.status != AdapterStatus::Failed) {
            self.publish_delivered(event, outcome).await;
        }

        let failed = statuses.iter().filter(|s| **s == AdapterStatus::Failed).count();
        info!(
            message_id = %event.message_id,
            pairs = statuses.len(),
            failed,
            status = ?aggregate,
            "Fan-out complete"
        );

        // Unrecorded attempts are retried with the whole record.
        for outcome in outcomes {
            outcome.recorded?;
        }
        Ok(aggregate)
    }
}

#[async_trait]
impl RecordHandler for DeliveryRouter {
    #[instrument(skip(self, record), fields(partition = record.partition, record_id = %record.id))]
    async fn handle(&self, record: &BusRecord) -> Result<(), AppError> {
        let event: MessageEvent = serde_json::from_str(&record.value)
            .map_err(|e| AppError::Validation(format!("malformed routing event: {}", e)))?;
        if let Some(field) = event.missing_field() {
            return Err(AppError::Validation(format!("routing event without {}", field)));
        }
        debug!(message_id = %event.message_id, seq = ?event.seq, "Routing message");
        self.route(&event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChannelAddress, Destination, FileRef, MediaKind, MockChannelAdapter, Payload,
    };
    use crate::infrastructure::bus::InMemoryBus;
    use crate::infrastructure::repositories::{
        InMemoryMessageRepository, StaticRecipientDirectory,
    };
    use pretty_assertions::assert_eq;

    struct Fixture {
        repo: Arc<InMemoryMessageRepository>,
        directory: Arc<StaticRecipientDirectory>,
        bus: Arc<InMemoryBus>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repo: Arc::new(InMemoryMessageRepository::new()),
                directory: Arc::new(StaticRecipientDirectory::new()),
                bus: Arc::new(InMemoryBus::new(1)),
            }
        }

        fn router(&self, registry: ChannelRegistry) -> DeliveryRouter {
            DeliveryRouter::new(
                self.repo.clone(),
                self.directory.clone(),
                registry,
                self.bus.clone(),
                "messages.delivery",
                Duration::from_millis(200),
            )
        }

        async fn persist(&self, event: &MessageEvent) {
            self.repo
                .insert_sequenced(&event.to_message(MessageStatus::Sent))
                .await
                .unwrap();
        }

        fn delivery_events(&self) -> Vec<DeliveryEvent> {
            self.bus
                .records("messages.delivery")
                .iter()
                .map(|r| serde_json::from_str(&r.value).unwrap())
                .collect()
        }
    }

    fn event(to: Vec<Destination>, channels: &[&str]) -> MessageEvent {
        MessageEvent {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            from: "u1".into(),
            to,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            payload: Payload::Text { text: "hi".into() },
            metadata: Default::default(),
            timestamp: 0,
            seq: Some(1),
            status: Some(MessageStatus::Sent),
        }
    }

    fn u2() -> Destination {
        Destination::new(
            "u2",
            vec![
                ChannelAddress::new("whatsapp", Some("+55119".into())),
                ChannelAddress::new("telegram", None),
            ],
        )
    }

    #[tokio::test]
    async fn test_single_pair_is_delivered() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["whatsapp"]);
        fixture.persist(&event).await;

        let status = fixture
            .router(ChannelRegistry::loopback(&["whatsapp".into()]))
            .route(&event)
            .await
            .unwrap();
        assert_eq!(status, Some(MessageStatus::Delivered));

        let stored = fixture.repo.find_by_message_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.per_channel_delivery.len(), 1);
        assert_eq!(stored.per_channel_delivery[0].target, "+55119");
        assert!(stored.delivered_at.is_some());

        let events = fixture.delivery_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to.as_deref(), Some("u2"));
        assert_eq!(events[0].from.as_deref(), Some("u1"));
        assert_eq!(events[0].status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_failing_pair_does_not_block_others() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["all"]);
        fixture.persist(&event).await;

        let mut broken = MockChannelAdapter::new();
        broken
            .expect_send_message()
            .times(1)
            .returning(|_| Err(AdapterError::Unavailable("down".into())));
        let registry = ChannelRegistry::loopback(&["whatsapp".into()])
            .with_adapter("telegram", Arc::new(broken));

        let status = fixture.router(registry).route(&event).await.unwrap();
        assert_eq!(status, Some(MessageStatus::Delivered));

        let stored = fixture.repo.find_by_message_id("m1").await.unwrap().unwrap();
        let mut attempts: Vec<_> = stored
            .per_channel_delivery
            .iter()
            .map(|a| (a.channel.as_str(), a.status))
            .collect();
        attempts.sort_by_key(|(channel, _)| *channel);
        assert_eq!(
            attempts,
            vec![
                ("telegram", MessageStatus::Failed),
                ("whatsapp", MessageStatus::Delivered),
            ]
        );
        assert_eq!(fixture.delivery_events().len(), 1);
    }

    #[tokio::test]
    async fn test_all_pairs_failing_marks_failed() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["whatsapp"]);
        fixture.persist(&event).await;

        let mut broken = MockChannelAdapter::new();
        broken
            .expect_send_message()
            .returning(|_| Err(AdapterError::Rejected("blocked".into())));
        let registry = ChannelRegistry::new().with_adapter("whatsapp", Arc::new(broken));

        let status = fixture.router(registry).route(&event).await.unwrap();
        assert_eq!(status, Some(MessageStatus::Failed));
        assert!(fixture.delivery_events().is_empty());
    }

    #[tokio::test]
    async fn test_sent_outcome_keeps_sent() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["whatsapp"]);
        fixture.persist(&event).await;

        let mut pending = MockChannelAdapter::new();
        pending
            .expect_send_message()
            .returning(|_| Ok(AdapterOutcome::sent()));
        let registry = ChannelRegistry::new().with_adapter("whatsapp", Arc::new(pending));

        let status = fixture.router(registry).route(&event).await.unwrap();
        assert_eq!(status, Some(MessageStatus::Sent));
        assert_eq!(fixture.delivery_events()[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_empty_destinations_use_directory() {
        let fixture = Fixture::new();
        fixture
            .directory
            .set_members("c1", vec![Destination::new("u1", vec![]), u2()]);
        let event = event(Vec::new(), &["telegram"]);
        fixture.persist(&event).await;

        fixture
            .router(ChannelRegistry::loopback(&["telegram".into()]))
            .route(&event)
            .await
            .unwrap();

        let events = fixture.delivery_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to.as_deref(), Some("u2"));
        assert_eq!(events[0].channel, "telegram");
    }

    #[tokio::test]
    async fn test_unregistered_channel_is_skipped() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["all"]);
        fixture.persist(&event).await;

        let status = fixture
            .router(ChannelRegistry::loopback(&["whatsapp".into()]))
            .route(&event)
            .await
            .unwrap();
        assert_eq!(status, Some(MessageStatus::Delivered));
        let stored = fixture.repo.find_by_message_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.per_channel_delivery.len(), 1);
    }

    #[tokio::test]
    async fn test_file_payload_uses_send_file_with_defaults() {
        let fixture = Fixture::new();
        let mut event = event(vec![u2()], &["whatsapp"]);
        event.payload = Payload::File {
            file: FileRef {
                file_id: "f-1".into(),
                kind: MediaKind::Image,
                url: None,
                mime_type: None,
                size: None,
                file_name: None,
            },
        };
        fixture.persist(&event).await;

        let mut adapter = MockChannelAdapter::new();
        adapter
            .expect_send_file()
            .withf(|cmd| {
                cmd.file_url == "f-1" && cmd.mime_type == DEFAULT_MIME_TYPE && cmd.size == 0
            })
            .times(1)
            .returning(|_| Ok(AdapterOutcome::delivered(Utc::now())));
        let registry = ChannelRegistry::new().with_adapter("whatsapp", Arc::new(adapter));

        let status = fixture.router(registry).route(&event).await.unwrap();
        assert_eq!(status, Some(MessageStatus::Delivered));
    }

    #[tokio::test]
    async fn test_read_message_is_not_downgraded_by_delivery() {
        let fixture = Fixture::new();
        let event = event(vec![u2()], &["whatsapp"]);
        fixture.persist(&event).await;
        let key = MessageKey::new("m1", "c1");
        fixture
            .repo
            .advance_status(&key, MessageStatus::Read, Utc::now())
            .await
            .unwrap();

        let status = fixture
            .router(ChannelRegistry::loopback(&["whatsapp".into()]))
            .route(&event)
            .await
            .unwrap();
        assert_eq!(status, Some(MessageStatus::Read));
    }
}

//! Status Ingestor
//!
//! Authenticates delivery/read callbacks from external channels, merges them
//! forward-only into the canonical record and republishes them for the
//! realtime notifier.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::application::dto::{
    DeliveryCallbackRequest, ReadCallbackRequest, WebhookAck,
};
use crate::config::{Settings, TopicSettings};
use crate::domain::{
    DeliveryEvent, MessageKey, MessageRepository, ReadEvent, Receipt, ReceiptKind,
};
use crate::infrastructure::bus::{headers, MessageBus, OutboundRecord};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;

type HmacSha256 = Hmac<Sha256>;

/// Channel used when a callback names none
pub const GENERIC_CHANNEL: &str = "generic";

/// Callback in the internal shape, produced by a [`CallbackNormalizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCallback {
    pub kind: ReceiptKind,
    pub body: Value,
}

/// Translates a channel's native callback body into the internal shape.
///
/// Returning `None` means the body is not a delivery or read receipt.
pub trait CallbackNormalizer: Send + Sync {
    fn normalize(&self, body: &Value) -> Option<NormalizedCallback>;
}

/// Accepts bodies already in internal form: a `type` of `delivery`,
/// `delivered` or `read` next to a `message_id`.
pub struct GenericNormalizer;

impl CallbackNormalizer for GenericNormalizer {
    fn normalize(&self, body: &Value) -> Option<NormalizedCallback> {
        body.get("message_id")?.as_str()?;
        let kind = match body.get("type")?.as_str()?.to_ascii_lowercase().as_str() {
            "delivery" | "delivered" => ReceiptKind::Delivery,
            "read" => ReceiptKind::Read,
            _ => return None,
        };
        Some(NormalizedCallback {
            kind,
            body: body.clone(),
        })
    }
}

/// Signature verification material.
#[derive(Clone)]
struct WebhookSecrets {
    per_channel: HashMap<String, String>,
    /// Fallback secret; absent in production
    default: Option<String>,
    allow_unsigned: bool,
}

impl WebhookSecrets {
    fn secret_for(&self, channel: &str) -> Option<&str> {
        self.per_channel
            .get(&channel.to_lowercase())
            .or(self.default.as_ref())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

pub struct StatusIngestor {
    messages: Arc<dyn MessageRepository>,
    bus: Arc<dyn MessageBus>,
    topics: TopicSettings,
    secrets: WebhookSecrets,
    normalizers: HashMap<String, Arc<dyn CallbackNormalizer>>,
    fallback: Arc<dyn CallbackNormalizer>,
}

impl StatusIngestor {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        bus: Arc<dyn MessageBus>,
        settings: &Settings,
    ) -> Self {
        let secrets = WebhookSecrets {
            per_channel: settings
                .webhook
                .secrets
                .iter()
                .map(|(channel, secret)| (channel.to_lowercase(), secret.clone()))
                .collect(),
            default: (!settings.is_production()).then(|| settings.webhook.default_secret.clone()),
            allow_unsigned: settings.is_development()
                && settings.webhook.allow_unsigned_in_development,
        };
        Self {
            messages,
            bus,
            topics: settings.bus.topics.clone(),
            secrets,
            normalizers: HashMap::new(),
            fallback: Arc::new(GenericNormalizer),
        }
    }

    /// Register a channel-specific normalizer for the generic endpoint.
    pub fn with_normalizer(mut self, channel: &str, normalizer: Arc<dyn CallbackNormalizer>) -> Self {
        self.normalizers.insert(channel.to_lowercase(), normalizer);
        self
    }

    /// Check the HMAC-SHA256 of the exact raw body against `signature`.
    pub fn verify_signature(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        channel: &str,
    ) -> Result<(), AppError> {
        let signature = match signature.map(str::trim).filter(|s| !s.is_empty()) {
            Some(signature) => signature,
            None if self.secrets.allow_unsigned => {
                warn!(channel, "Accepting unsigned callback (development)");
                return Ok(());
            }
            None => return Err(AppError::Unauthorized("Missing webhook signature".into())),
        };

        let secret = self.secrets.secret_for(channel).ok_or_else(|| {
            AppError::Unauthorized(format!("No webhook secret configured for channel {}", channel))
        })?;

        let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
        let expected = hex::decode(hex_digest)
            .map_err(|_| AppError::Unauthorized("Invalid webhook signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
        mac.update(raw_body);
        mac.verify_slice(&expected)
            .map_err(|_| AppError::Unauthorized("Invalid webhook signature".into()))
    }

    /// Authenticate and apply a delivery or read callback.
    #[instrument(skip_all, fields(channel = %channel, kind = kind.as_str()))]
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        channel: &str,
        kind: ReceiptKind,
    ) -> Result<WebhookAck, AppError> {
        if let Err(e) = self.verify_signature(raw_body, signature, channel) {
            metrics::record_webhook(kind.as_str(), "unauthorized");
            warn!(channel, error = %e, "Callback rejected");
            return Err(e);
        }

        let body: Value = serde_json::from_slice(raw_body).map_err(|e| {
            metrics::record_webhook(kind.as_str(), "invalid");
            AppError::Validation(format!("Malformed callback body: {}", e))
        })?;
        self.apply(kind, body, channel).await
    }

    /// Authenticate a callback in a channel's native format and dispatch it
    /// to the delivery or read path.
    #[instrument(skip_all, fields(channel = %channel))]
    pub async fn ingest_channel(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        channel: &str,
    ) -> Result<WebhookAck, AppError> {
        if let Err(e) = self.verify_signature(raw_body, signature, channel) {
            metrics::record_webhook(GENERIC_CHANNEL, "unauthorized");
            warn!(channel, error = %e, "Callback rejected");
            return Err(e);
        }

        let body: Value = serde_json::from_slice(raw_body).map_err(|e| {
            metrics::record_webhook(GENERIC_CHANNEL, "invalid");
            AppError::Validation(format!("Malformed callback body: {}", e))
        })?;

        let normalizer = self
            .normalizers
            .get(&channel.to_lowercase())
            .unwrap_or(&self.fallback);
        match normalizer.normalize(&body) {
            Some(callback) => self.apply(callback.kind, callback.body, channel).await,
            None => {
                debug!(channel, "Callback not recognized; ignored");
                metrics::record_webhook(GENERIC_CHANNEL, "ignored");
                Ok(WebhookAck::ignored(channel))
            }
        }
    }

    async fn apply(
        &self,
        kind: ReceiptKind,
        body: Value,
        channel: &str,
    ) -> Result<WebhookAck, AppError> {
        let result = match kind {
            ReceiptKind::Delivery => self.apply_delivery(body, channel).await,
            ReceiptKind::Read => self.apply_read(body, channel).await,
        };
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(AppError::Validation(_)) | Err(AppError::BadRequest(_)) => "invalid",
            Err(_) => "error",
        };
        metrics::record_webhook(kind.as_str(), outcome);
        result
    }

    async fn apply_delivery(&self, body: Value, channel: &str) -> Result<WebhookAck, AppError> {
        let request: DeliveryCallbackRequest = serde_json::from_value(body)
            .map_err(|e| AppError::Validation(format!("Malformed delivery callback: {}", e)))?;
        request.validate().map_err(validation_error)?;

        let at = callback_time(request.timestamp)?;
        let key = MessageKey::new(&request.message_id, &request.conversation_id);
        let outcome = self
            .messages
            .record_receipt(
                &key,
                &Receipt {
                    kind: ReceiptKind::Delivery,
                    actor: request.recipient_id.clone(),
                    at,
                },
            )
            .await?;
        info!(
            message_id = %key.message_id,
            recipient_id = %request.recipient_id,
            status = %outcome.status,
            placeholder = outcome.created,
            "Delivery receipt recorded"
        );

        let event = DeliveryEvent {
            message_id: request.message_id,
            conversation_id: request.conversation_id,
            from: outcome.from,
            to: None,
            recipient_id: Some(request.recipient_id),
            status: ReceiptKind::Delivery.target_status(),
            channel: channel.to_string(),
            timestamp: at.timestamp_millis(),
        };
        self.notify(&self.topics.delivery, &event.conversation_id, &event.message_id, &event)
            .await;
        Ok(WebhookAck::processed(ReceiptKind::Delivery.as_str()))
    }

    async fn apply_read(&self, body: Value, channel: &str) -> Result<WebhookAck, AppError> {
        let request: ReadCallbackRequest = serde_json::from_value(body)
            .map_err(|e| AppError::Validation(format!("Malformed read callback: {}", e)))?;
        request.validate().map_err(validation_error)?;

        let at = callback_time(request.timestamp)?;
        let key = MessageKey::new(&request.message_id, &request.conversation_id);
        let outcome = self
            .messages
            .record_receipt(
                &key,
                &Receipt {
                    kind: ReceiptKind::Read,
                    actor: request.reader_id.clone(),
                    at,
                },
            )
            .await?;
        info!(
            message_id = %key.message_id,
            reader_id = %request.reader_id,
            status = %outcome.status,
            placeholder = outcome.created,
            "Read receipt recorded"
        );

        let event = ReadEvent {
            message_id: request.message_id,
            conversation_id: request.conversation_id,
            from: outcome.from,
            reader_id: request.reader_id,
            status: ReceiptKind::Read.target_status(),
            channel: channel.to_string(),
            timestamp: at.timestamp_millis(),
        };
        self.notify(&self.topics.read, &event.conversation_id, &event.message_id, &event)
            .await;
        Ok(WebhookAck::processed(ReceiptKind::Read.as_str()))
    }

    /// Best-effort republish; the store update already happened.
    async fn notify<T: serde::Serialize>(
        &self,
        topic: &str,
        conversation_id: &str,
        message_id: &str,
        event: &T,
    ) {
        let record = match OutboundRecord::json(conversation_id, event) {
            Ok(record) => record
                .with_header(headers::MESSAGE_ID, message_id)
                .with_header(headers::CONVERSATION_ID, conversation_id),
            Err(e) => {
                warn!(message_id, error = %e, "Failed to encode receipt event");
                return;
            }
        };
        match self.bus.publish(topic, record).await {
            Ok(()) => metrics::record_published(topic, true),
            Err(e) => {
                metrics::record_published(topic, false);
                warn!(topic, message_id, error = %e, "Receipt event not published");
            }
        }
    }
}

fn callback_time(timestamp: Option<i64>) -> Result<DateTime<Utc>, AppError> {
    match timestamp {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| AppError::Validation(format!("timestamp out of range: {}", ms))),
        None => Ok(Utc::now()),
    }
}

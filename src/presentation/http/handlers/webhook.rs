//! Webhook Handlers
//!
//! Bodies are taken as raw bytes so the signature is checked over exactly
//! what the channel sent.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};

use crate::application::dto::WebhookAck;
use crate::domain::ReceiptKind;
use crate::presentation::http::extractors::WebhookHeaders;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Delivery receipt callback
pub async fn delivery_callback(
    State(state): State<AppState>,
    headers: WebhookHeaders,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let ack = state
        .status
        .ingest(
            &body,
            headers.signature.as_deref(),
            &headers.channel,
            ReceiptKind::Delivery,
        )
        .await?;
    Ok(Json(ack))
}

/// Read receipt callback
pub async fn read_callback(
    State(state): State<AppState>,
    headers: WebhookHeaders,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let ack = state
        .status
        .ingest(
            &body,
            headers.signature.as_deref(),
            &headers.channel,
            ReceiptKind::Read,
        )
        .await?;
    Ok(Json(ack))
}

/// Callback in a channel's native format; the path names the channel
pub async fn channel_callback(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: WebhookHeaders,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let ack = state
        .status
        .ingest_channel(
            &body,
            headers.signature.as_deref(),
            &channel.to_lowercase(),
        )
        .await?;
    Ok(Json(ack))
}

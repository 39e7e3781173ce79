//! Custom Extractors
//!
//! Axum extractors for webhook request metadata.

use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};

use crate::application::services::GENERIC_CHANNEL;
use crate::shared::error::AppError;

const SIGNATURE_HEADERS: [&str; 2] = ["x-webhook-signature", "x-signature"];
const CHANNEL_HEADERS: [&str; 2] = ["x-webhook-channel", "x-channel"];

/// Signature and channel headers of a webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub channel: String,
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

impl WebhookHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            signature: first_header(headers, &SIGNATURE_HEADERS),
            channel: first_header(headers, &CHANNEL_HEADERS)
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| GENERIC_CHANNEL.to_string()),
        }
    }
}

impl<S> FromRequestParts<S> for WebhookHeaders
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

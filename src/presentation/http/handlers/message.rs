//! Message Handlers

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::application::dto::{AcceptedResponse, HistoryParams, HistoryResponse, SendMessageRequest};
use crate::application::services::PublishCommand;
use crate::domain::HistoryQuery;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Accept a message for asynchronous delivery
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    body.validate().map_err(validation_error)?;

    let receipt = state
        .publisher
        .publish(PublishCommand {
            message_id: body.message_id,
            conversation_id: body.conversation_id,
            from: auth.user_id,
            channels: body.channels,
            payload: body.payload,
            metadata: body.metadata,
            to: body.to,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

/// Page through a conversation's persisted messages by seq
pub async fn get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    params.validate().map_err(validation_error)?;

    let page_size = params.page_size();
    let query = HistoryQuery {
        since_seq: params.since_seq,
        until_seq: params.until_seq,
        limit: page_size + 1,
        reverse: params.reverse,
    };

    let mut messages = state
        .messages
        .find_by_conversation(&conversation_id, &query)
        .await?;

    let has_more = messages.len() as i64 > page_size;
    messages.truncate(page_size as usize);

    let next_seq = if has_more || params.since_seq.is_some() {
        messages.last().and_then(|m| m.seq)
    } else {
        None
    };

    Ok(Json(HistoryResponse {
        conversation_id,
        messages,
        has_more,
        next_seq,
    }))
}

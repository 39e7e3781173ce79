//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::presentation::middleware::{auth_middleware, track_http_metrics};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // Delivery/read callbacks authenticate by body signature, not bearer token
        .nest("/webhooks", webhook_routes())
        // Realtime status updates
        .route("/ws", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(handlers::health::metrics_handler))
        .layer(middleware::from_fn(track_http_metrics))
        .with_state(state)
}

/// API v1 routes (protected)
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/messages", post(handlers::message::send_message))
        .route(
            "/conversations/{conversation_id}/messages",
            get(handlers::message::get_history),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Channel callback routes (public, signature-checked)
fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/delivery", post(handlers::webhook::delivery_callback))
        .route("/read", post(handlers::webhook::read_callback))
        .route("/{channel}", post(handlers::webhook::channel_callback))
}

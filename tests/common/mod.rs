//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;

use relay_hub::config::Settings;
use relay_hub::domain::{
    AdapterError, AdapterOutcome, ChannelAdapter, ConnectionId, Message, MessageRepository,
    SendFileCommand, SendMessageCommand,
};
use relay_hub::infrastructure::bus::InMemoryBus;
use relay_hub::infrastructure::channels::ChannelRegistry;
use relay_hub::infrastructure::repositories::{
    InMemoryMessageRepository, StaticRecipientDirectory,
};
use relay_hub::presentation::middleware::Claims;
use relay_hub::startup::{assemble, build_router, AppState, Backends, Workers};

/// Default webhook secret of non-production settings
pub const WEBHOOK_SECRET: &str = "relay-hub-default-secret";

/// Test application over the in-memory bus and store
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<InMemoryMessageRepository>,
    pub directory: Arc<StaticRecipientDirectory>,
    workers: Option<Workers>,
}

impl TestApp {
    /// Full pipeline: HTTP surface plus every worker
    pub async fn new() -> Self {
        Self::build(test_settings(), None).await
    }

    /// HTTP surface only; nothing consumes the bus
    pub async fn without_workers() -> Self {
        let mut settings = test_settings();
        settings.workers.sequencer = false;
        settings.workers.router = false;
        settings.workers.notifier = false;
        Self::build(settings, None).await
    }

    /// Full pipeline with a custom adapter registry
    pub async fn with_channels(channels: ChannelRegistry) -> Self {
        Self::build(test_settings(), Some(channels)).await
    }

    pub async fn build(settings: Settings, channels: Option<ChannelRegistry>) -> Self {
        let bus = Arc::new(InMemoryBus::new(settings.bus.partitions));
        let store = Arc::new(InMemoryMessageRepository::new());
        let directory = Arc::new(StaticRecipientDirectory::new());
        Self::assemble_on(settings, bus, store, directory, channels).await
    }

    /// Stop the workers, then wire a fresh process over the same bus and store
    pub async fn restart(mut self, settings: Settings) -> Self {
        self.stop_workers().await;
        Self::assemble_on(settings, self.bus, self.store, self.directory, None).await
    }

    async fn assemble_on(
        settings: Settings,
        bus: Arc<InMemoryBus>,
        store: Arc<InMemoryMessageRepository>,
        directory: Arc<StaticRecipientDirectory>,
        channels: Option<ChannelRegistry>,
    ) -> Self {
        let channels =
            channels.unwrap_or_else(|| ChannelRegistry::loopback(&settings.delivery.channels));

        let backends = Backends {
            messages: store.clone(),
            directory: directory.clone(),
            bus: bus.clone(),
            channels,
        };
        let (state, workers) = assemble(settings, backends);
        let router = build_router(state.clone());

        // Let consumer loops open their subscriptions before anything is published.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            router,
            state,
            bus,
            store,
            directory,
            workers: Some(workers),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    /// Stop every pipeline worker; the HTTP surface keeps answering
    pub async fn stop_workers(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Make an authenticated GET request
    pub async fn get_auth(&self, uri: &str, token: &str) -> Response {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json_auth(&self, uri: &str, body: &Value, token: &str) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// POST a raw callback body with an optional signature header
    pub async fn post_webhook(&self, uri: &str, body: &str, signature: Option<&str>) -> Response {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(signature) = signature {
            request = request.header("X-Webhook-Signature", signature);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// POST a callback signed with the default secret
    pub async fn post_signed(&self, uri: &str, body: &Value) -> Response {
        let body = body.to_string();
        let signature = sign(&body, WEBHOOK_SECRET);
        self.post_webhook(uri, &body, Some(&signature)).await
    }

    /// Publish a message through the ingest API as `user_id`
    pub async fn send_message(&self, user_id: &str, body: Value) -> Response {
        self.post_json_auth("/api/v1/messages", &body, &token_for(user_id))
            .await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Open a realtime connection joined as `user_id`
    pub fn connect(&self, user_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        self.state.gateway.register(id, tx);
        assert!(self.state.gateway.join(id, user_id));
        rx
    }

    /// Wait until the stored record of `message_id` satisfies `done`
    pub async fn wait_for_message<F>(&self, message_id: &str, done: F) -> Message
    where
        F: Fn(&Message) -> bool,
    {
        let store = &self.store;
        let done = &done;
        eventually(move || async move {
            store
                .find_by_message_id(message_id)
                .await
                .ok()
                .flatten()
                .filter(|m| done(m))
        })
        .await
    }
}

/// Settings for an isolated in-memory run
pub fn test_settings() -> Settings {
    let mut settings = Settings::in_memory("test").unwrap();
    settings.bus.poll_timeout_ms = 20;
    settings.bus.redelivery_backoff_ms = 50;
    settings.delivery.adapter_timeout_ms = 500;
    settings
}

/// Bearer token for `user_id`
pub fn token_for(user_id: &str) -> String {
    let settings = Settings::in_memory("test").unwrap();
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt.secret.as_bytes()),
    )
    .unwrap()
}

/// Hex HMAC-SHA256 of `body`
pub fn sign(body: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Read a response body as JSON
pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `probe` until it yields a value, failing after five seconds
pub async fn eventually<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..250 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 5s");
}

/// Next frame on `rx` whose topic is `topic`
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>, topic: &str) -> Value {
    let wait = async {
        while let Some(frame) = rx.recv().await {
            let frame: Value = serde_json::from_str(&frame).unwrap();
            if frame["topic"] == topic {
                return frame;
            }
        }
        panic!("connection closed before a {} frame arrived", topic);
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("no {} frame within 5s", topic))
}

/// A text message body for the ingest API
pub fn text_message(conversation_id: &str, text: &str) -> Value {
    serde_json::json!({
        "conversation_id": conversation_id,
        "payload": { "type": "text", "text": text },
        "to": [{ "user_id": "u2", "channels": [{ "channel": "whatsapp" }] }]
    })
}

/// Adapter that always raises a channel error
pub struct FailingAdapter;

#[async_trait]
impl ChannelAdapter for FailingAdapter {
    async fn send_message(
        &self,
        _command: &SendMessageCommand,
    ) -> Result<AdapterOutcome, AdapterError> {
        Err(AdapterError::Unavailable("channel down".into()))
    }

    async fn send_file(&self, _command: &SendFileCommand) -> Result<AdapterOutcome, AdapterError> {
        Err(AdapterError::Unavailable("channel down".into()))
    }
}

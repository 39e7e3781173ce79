//! Application settings and configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// Channels that may carry a dedicated webhook secret via `WEBHOOK_SECRET_<CHANNEL>`.
const SECRET_CHANNELS: [&str; 5] = ["whatsapp", "instagram", "telegram", "messenger", "sms"];

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Canonical message store selection
    pub store: StoreSettings,

    /// Redis configuration
    pub redis: RedisSettings,

    /// Message bus topology and consumer tuning
    pub bus: BusSettings,

    /// Which pipeline workers this process runs
    pub workers: WorkerSettings,

    /// Channel adapter fan-out settings
    pub delivery: DeliverySettings,

    /// Delivery/read callback authentication
    pub webhook: WebhookSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Apply pending migrations at startup
    pub run_migrations: bool,
}

/// Storage backend for canonical message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// Transport behind the message bus abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    Redis,
    Memory,
}

/// Topic names used by the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicSettings {
    /// Messages to persist (ingest)
    pub ingest: String,

    /// Messages to fan out (routing)
    pub routing: String,

    /// Per-channel delivery outcomes and delivery receipts
    pub delivery: String,

    /// Read receipts
    pub read: String,
}

/// Message bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    pub backend: BusBackend,

    /// Client identifier, prefix of this process's partition lease token
    pub client_id: String,

    /// Number of partitions per topic
    pub partitions: u32,

    /// Approximate cap on entries kept per stream; 0 keeps everything
    pub stream_max_len: u64,

    /// How long a partition lease survives without renewal, in milliseconds
    pub lease_ttl_ms: u64,

    pub topics: TopicSettings,

    /// Consumer group of the sequencer/persister
    pub sequencer_group: String,

    /// Consumer group of the delivery router
    pub router_group: String,

    /// Partitions this instance consumes; all partitions when unset
    pub assigned_partitions: Option<Vec<u32>>,

    /// How long a single poll waits for a record, in milliseconds
    pub poll_timeout_ms: u64,

    /// Publish attempts beyond the first before surfacing an error
    pub publish_retries: u32,

    /// First publish retry delay in milliseconds (doubles per attempt)
    pub retry_initial_backoff_ms: u64,

    /// Delay before an uncommitted record is handed out again, in milliseconds
    pub redelivery_backoff_ms: u64,

    /// Deliveries of one record before it is skipped as permanently failed
    pub max_deliveries: u32,
}

/// Worker toggles; a deployment may split workers across processes.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub sequencer: bool,
    pub router: bool,
    pub notifier: bool,
}

/// Delivery router configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    /// Upper bound for a single channel adapter call, in milliseconds
    pub adapter_timeout_ms: u64,

    /// Channel names accepted at ingest and registered with the loopback adapter
    pub channels: Vec<String>,
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    /// Secret used when a channel has no dedicated one (non-production only)
    pub default_secret: String,

    /// Per-channel secrets keyed by channel name
    #[serde(default)]
    pub secrets: HashMap<String, String>,

    /// Accept unsigned callbacks while running in development
    pub allow_unsigned_in_development: bool,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying bearer tokens
    pub secret: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Interval between server pings in seconds
    pub ping_interval_secs: u64,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        let mut builder = Self::defaults(&environment)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("delivery.channels")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option(
                "webhook.default_secret",
                std::env::var("WEBHOOK_SECRET_DEFAULT").ok(),
            )?;

        for channel in SECRET_CHANNELS {
            let var = format!("WEBHOOK_SECRET_{}", channel.to_uppercase());
            builder = builder.set_override_option(
                format!("webhook.secrets.{}", channel),
                std::env::var(var).ok(),
            )?;
        }

        builder.build()?.try_deserialize().and_then(Self::validated)
    }

    /// Self-contained settings backed by the in-memory bus and store.
    ///
    /// Used for local runs without Redis/PostgreSQL and by the integration tests.
    pub fn in_memory(environment: &str) -> Result<Self, ConfigError> {
        Self::defaults(environment)?
            .set_override("store.backend", "memory")?
            .set_override("bus.backend", "memory")?
            .set_override("database.url", "postgres://unused")?
            .set_override("redis.url", "redis://unused")?
            .set_override("jwt.secret", "in-memory-development-secret-0123456789")?
            .build()?
            .try_deserialize()
            .and_then(Self::validated)
    }

    fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("store.backend", "postgres")?
            .set_default("bus.backend", "redis")?
            .set_default("bus.client_id", "relay-hub")?
            .set_default("bus.partitions", 3)?
            .set_default("bus.stream_max_len", 100_000_i64)?
            .set_default("bus.lease_ttl_ms", 15_000_i64)?
            .set_default("bus.topics.ingest", "messages.send")?
            .set_default("bus.topics.routing", "messages.routing")?
            .set_default("bus.topics.delivery", "messages.delivery")?
            .set_default("bus.topics.read", "messages.read")?
            .set_default("bus.sequencer_group", "message-consumer-group")?
            .set_default("bus.router_group", "router-worker-group")?
            .set_default("bus.poll_timeout_ms", 200)?
            .set_default("bus.publish_retries", 5)?
            .set_default("bus.retry_initial_backoff_ms", 100)?
            .set_default("bus.redelivery_backoff_ms", 500)?
            .set_default("bus.max_deliveries", 10)?
            .set_default("workers.sequencer", true)?
            .set_default("workers.router", true)?
            .set_default("workers.notifier", true)?
            .set_default("delivery.adapter_timeout_ms", 5000)?
            .set_default("delivery.channels", vec!["whatsapp", "instagram", "telegram"])?
            .set_default("webhook.default_secret", "relay-hub-default-secret")?
            .set_default("webhook.allow_unsigned_in_development", true)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.ping_interval_secs", 30_i64)
    }

    fn validated(settings: Self) -> Result<Self, ConfigError> {
        if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                settings.jwt.secret.len()
            )));
        }
        if settings.bus.partitions == 0 {
            return Err(ConfigError::Message("bus.partitions must be at least 1".into()));
        }
        if settings.bus.lease_ttl_ms < 300 {
            return Err(ConfigError::Message("bus.lease_ttl_ms must be at least 300".into()));
        }
        if let Some(assigned) = &settings.bus.assigned_partitions {
            if let Some(p) = assigned.iter().find(|p| **p >= settings.bus.partitions) {
                return Err(ConfigError::Message(format!(
                    "assigned partition {} is outside 0..{}",
                    p, settings.bus.partitions
                )));
            }
        }
        Ok(settings)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

impl BusSettings {
    /// Partitions this instance owns for partitioned consumption.
    pub fn owned_partitions(&self) -> Vec<u32> {
        match &self.assigned_partitions {
            Some(assigned) => assigned.clone(),
            None => (0..self.partitions).collect(),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

impl DeliverySettings {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

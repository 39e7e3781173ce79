//! # Relay Hub Library
//!
//! This crate provides a multi-channel message delivery pipeline with:
//! - An HTTP ingest API that accepts messages without waiting for delivery
//! - A partitioned message bus keeping per-conversation order
//! - A sequencer assigning gap-free sequence numbers per conversation
//! - A delivery router fanning messages out to channel adapters
//! - Signed webhooks for delivery and read receipts
//! - A WebSocket gateway pushing status updates to connected users
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Message record, status state machine, collaborator traits
//! - **Application Layer**: Pipeline stages and DTOs
//! - **Infrastructure Layer**: Bus transports, stores, channel adapters, metrics
//! - **Presentation Layer**: HTTP handlers, webhooks and WebSocket gateway
//!
//! ## Pipeline
//!
//! ```text
//! POST /api/v1/messages -> messages.send -> sequencer -> messages.routing
//!     -> router -> adapters -> messages.delivery
//! POST /webhooks/{delivery,read} -> store -> messages.delivery / messages.read
//! messages.* -> notifier -> /ws clients
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Pipeline stages
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;

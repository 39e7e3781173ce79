//! Application Services
//!
//! The pipeline stages, each coordinating domain rules with the bus and
//! the message store.
//!
//! ## Available Services
//!
//! - **IngestPublisher**: validates outbound messages and publishes them to the ingest topic
//! - **Sequencer**: assigns per-conversation sequence numbers and persists records
//! - **DeliveryRouter**: fans sequenced messages out to channel adapters
//! - **StatusIngestor**: authenticates and applies delivery/read callbacks
//! - **RealtimeNotifier**: pushes pipeline events to live client connections

pub mod delivery_router;
pub mod ingest_publisher;
pub mod realtime_notifier;
pub mod sequencer;
pub mod status_ingestor;

pub use delivery_router::DeliveryRouter;
pub use ingest_publisher::{IngestPublisher, PublishCommand, PublishReceipt};
pub use realtime_notifier::{target_users, ConnectionRegistry, RealtimeNotifier};
pub use sequencer::Sequencer;
pub use status_ingestor::{
    CallbackNormalizer, GenericNormalizer, NormalizedCallback, StatusIngestor, GENERIC_CHANNEL,
};

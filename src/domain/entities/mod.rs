//! # Domain Entities
//!
//! Core domain entities of the delivery pipeline.
//!
//! ## Entities
//!
//! - **Message**: canonical record with its sequence number and status
//! - **Payload**: closed sum type of message contents
//! - **Destination**: a recipient and its channel addresses
//! - **Events**: records exchanged between pipeline stages over the bus
//!
//! ## Repository Traits
//!
//! The message store is defined here as a trait and implemented in the
//! infrastructure layer, following the dependency inversion principle.

mod destination;
mod events;
mod message;
mod payload;

pub use destination::{ChannelAddress, Destination};
pub use events::{DeliveryEvent, MessageEvent, ReadEvent};
pub use message::{
    DeliveryAttempt, HistoryQuery, Message, MessageKey, MessageRepository, MessageStatus,
    Metadata, PersistOutcome, Receipt, ReceiptKind, ReceiptOutcome,
};
pub use payload::{Contact, FileRef, Location, MediaKind, Payload, PayloadError};

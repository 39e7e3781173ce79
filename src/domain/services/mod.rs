//! # Domain Services
//!
//! Domain services encapsulate business rules that don't naturally belong
//! to a single entity, plus the collaborator interfaces the pipeline
//! depends on.
//!
//! ## Services
//!
//! - **DeliveryPlanner**: fan-out pairing and aggregate status policy
//! - **ChannelAdapter**: capability interface of an external channel
//! - **RecipientDirectory**: conversation membership lookup

mod channel_adapter;
mod delivery_plan;
mod recipient_directory;

pub use channel_adapter::*;
pub use delivery_plan::*;
pub use recipient_directory::*;

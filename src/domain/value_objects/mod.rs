//! # Domain Value Objects
//!
//! Immutable value types that represent domain concepts without identity.
//!
//! - **partition_for**: conversation to bus partition mapping
//! - **ConnectionId**: identity of a realtime client connection

mod ids;
mod partition;

pub use ids::*;
pub use partition::*;

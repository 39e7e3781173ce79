//! # Domain Layer
//!
//! The domain layer contains the core rules of the delivery pipeline.
//! It is independent of any external frameworks or infrastructure concerns.
//!
//! ## Structure
//!
//! - **entities**: Message record, payloads, destinations and bus events
//! - **value_objects**: Partition selector and identifiers
//! - **services**: Fan-out planning and collaborator traits
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Repository and collaborator traits define the contracts
//! - Entities encapsulate the status state machine

pub mod entities;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use services::*;
pub use value_objects::*;

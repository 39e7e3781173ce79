//! Repository Implementations
//!
//! Implementations of the domain repository and directory traits.
//!
//! ## Available Repositories
//!
//! - **PgMessageRepository** - Canonical message store on PostgreSQL
//! - **InMemoryMessageRepository** - Same contract held in process memory
//! - **PgRecipientDirectory** - Conversation membership lookup on PostgreSQL
//! - **StaticRecipientDirectory** - Membership seeded in memory
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use relay_hub::infrastructure::repositories::{PgMessageRepository, PgRecipientDirectory};
//!
//! async fn setup_repositories(pool: PgPool) {
//!     let messages = PgMessageRepository::new(pool.clone());
//!     let directory = PgRecipientDirectory::new(pool);
//! }
//! ```

pub mod memory_message_repository;
pub mod message_repository;
pub mod recipient_directory;

pub use memory_message_repository::InMemoryMessageRepository;
pub use message_repository::PgMessageRepository;
pub use recipient_directory::{PgRecipientDirectory, StaticRecipientDirectory};

//! Recipient lookup for messages submitted without explicit destinations.

use async_trait::async_trait;

use crate::domain::entities::Destination;
use crate::shared::error::AppError;

/// Resolves the members of a conversation and their channel addresses.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Members of `conversation_id` other than `sender`.
    async fn recipients(
        &self,
        conversation_id: &str,
        sender: &str,
    ) -> Result<Vec<Destination>, AppError>;
}

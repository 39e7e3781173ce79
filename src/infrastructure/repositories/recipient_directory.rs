//! Recipient Directory Implementations
//!
//! Resolve conversation members and their channel addresses for messages
//! submitted without explicit destinations.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;

use crate::domain::{ChannelAddress, Destination, RecipientDirectory};
use crate::shared::error::AppError;

/// Read-only directory over `conversation_members` and `user_channels`.
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberChannelRow {
    user_id: String,
    channel: Option<String>,
    channel_user_id: Option<String>,
    display_name: Option<String>,
}

/// Fold rows ordered by user into one destination per user.
fn group_rows(rows: Vec<MemberChannelRow>) -> Vec<Destination> {
    let mut destinations: Vec<Destination> = Vec::new();
    for row in rows {
        let address = row.channel.map(|channel| ChannelAddress {
            channel,
            channel_user_id: row.channel_user_id,
            display_name: row.display_name,
        });
        match destinations.last_mut() {
            Some(last) if last.user_id == row.user_id => last.channels.extend(address),
            _ => destinations.push(Destination::new(row.user_id, address.into_iter().collect())),
        }
    }
    destinations
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn recipients(
        &self,
        conversation_id: &str,
        sender: &str,
    ) -> Result<Vec<Destination>, AppError> {
        let rows = sqlx::query_as::<_, MemberChannelRow>(
            r#"
            SELECT m.user_id, uc.channel, uc.channel_user_id, uc.display_name
            FROM conversation_members m
            LEFT JOIN user_channels uc ON uc.user_id = m.user_id
            WHERE m.conversation_id = $1 AND m.user_id <> $2
            ORDER BY m.user_id, uc.channel
            "#,
        )
        .bind(conversation_id)
        .bind(sender)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_rows(rows))
    }
}

/// Directory held in memory, seeded by configuration or tests.
#[derive(Default)]
pub struct StaticRecipientDirectory {
    conversations: RwLock<HashMap<String, Vec<Destination>>>,
}

impl StaticRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the members of a conversation.
    pub fn set_members(&self, conversation_id: &str, members: Vec<Destination>) {
        self.conversations
            .write()
            .insert(conversation_id.to_string(), members);
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn recipients(
        &self,
        conversation_id: &str,
        sender: &str,
    ) -> Result<Vec<Destination>, AppError> {
        Ok(self
            .conversations
            .read()
            .get(conversation_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|member| member.user_id != sender)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

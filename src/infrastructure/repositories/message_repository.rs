//! Message Repository Implementation
//!
//! PostgreSQL implementation of the canonical message store with atomic
//! per-conversation sequencing, forward-only status updates and receipt
//! upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::domain::{
    DeliveryAttempt, Destination, HistoryQuery, Message, MessageKey, MessageRepository,
    MessageStatus, Metadata, Payload, PersistOutcome, Receipt, ReceiptKind, ReceiptOutcome,
};
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
///
/// Provides:
/// - Sequence allocation from `conversation_sequences` inside the insert transaction
/// - Placeholder merge for receipts that arrived before the canonical write
/// - Seq-range pagination per conversation
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str = r#"
    message_id, conversation_id, sender_id, destinations, channels, payload,
    metadata, seq, status, per_channel_delivery, delivered_to, read_by,
    created_at, updated_at, delivered_at, read_at
"#;

/// Internal row type for message queries.
/// Maps to the messages table schema defined in the migration.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    conversation_id: String,
    sender_id: Option<String>,
    destinations: Json<Vec<Destination>>,
    channels: Vec<String>,
    payload: Option<Json<Payload>>,
    metadata: Json<Metadata>,
    seq: Option<i64>,
    status: String,
    per_channel_delivery: Json<Vec<DeliveryAttempt>>,
    delivered_to: Vec<String>,
    read_by: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// Converts database row to domain Message entity.
    fn into_message(self) -> Result<Message, AppError> {
        let status = parse_status(&self.status)?;
        Ok(Message {
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            from: self.sender_id,
            to: self.destinations.0,
            channels: self.channels,
            payload: self.payload.map(|p| p.0),
            metadata: self.metadata.0,
            seq: self.seq,
            status,
            per_channel_delivery: self.per_channel_delivery.0,
            delivered_to: self.delivered_to,
            read_by: self.read_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            delivered_at: self.delivered_at,
            read_at: self.read_at,
        })
    }
}

fn parse_status(raw: &str) -> Result<MessageStatus, AppError> {
    MessageStatus::parse(raw).ok_or_else(|| AppError::Internal(format!("unknown status {}", raw)))
}

fn status_names(statuses: Vec<MessageStatus>) -> Vec<String> {
    statuses.into_iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Message>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM messages WHERE message_id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MessageRow::into_message).transpose()
    }

    async fn count_by_conversation(&self, conversation_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND seq IS NOT NULL",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Allocate the next seq and write the record in one transaction.
    ///
    /// A rolled back transaction also rolls back the counter, so a failed
    /// write never leaves a gap behind.
    #[instrument(skip(self, message), fields(message_id = %message.message_id, conversation_id = %message.conversation_id))]
    async fn insert_sequenced(&self, message: &Message) -> Result<PersistOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT seq FROM messages WHERE message_id = $1 FOR UPDATE",
        )
        .bind(&message.message_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(Some(seq)) = existing {
            tx.rollback().await?;
            return Ok(PersistOutcome::Duplicate { seq });
        }

        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO conversation_sequences (conversation_id, last_seq)
            VALUES ($1, 1)
            ON CONFLICT (conversation_id)
            DO UPDATE SET last_seq = conversation_sequences.last_seq + 1, updated_at = NOW()
            RETURNING last_seq
            "#,
        )
        .bind(&message.conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        // Merge into a receipt placeholder without lowering its status.
        let written = sqlx::query_as::<_, (i64, String)>(
            r#"
            INSERT INTO messages (
                message_id, conversation_id, sender_id, destinations, channels,
                payload, metadata, seq, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (message_id) DO UPDATE SET
                sender_id = EXCLUDED.sender_id,
                destinations = EXCLUDED.destinations,
                channels = EXCLUDED.channels,
                payload = EXCLUDED.payload,
                metadata = EXCLUDED.metadata,
                seq = EXCLUDED.seq,
                status = CASE WHEN messages.status = ANY($11) THEN EXCLUDED.status
                              ELSE messages.status END,
                updated_at = NOW()
            WHERE messages.seq IS NULL
              AND messages.conversation_id = EXCLUDED.conversation_id
            RETURNING seq, status
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.conversation_id)
        .bind(&message.from)
        .bind(Json(&message.to))
        .bind(&message.channels)
        .bind(message.payload.as_ref().map(Json))
        .bind(Json(&message.metadata))
        .bind(seq)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(status_names(message.status.predecessors()))
        .fetch_optional(&mut *tx)
        .await?;

        match written {
            Some((seq, status)) => {
                tx.commit().await?;
                debug!(seq, "Message sequenced");
                Ok(PersistOutcome::Inserted {
                    seq,
                    status: parse_status(&status)?,
                })
            }
            None => {
                // Lost a race against another writer for the same id.
                tx.rollback().await?;
                let current = self.find_by_message_id(&message.message_id).await?;
                match current.and_then(|m| m.seq) {
                    Some(seq) => Ok(PersistOutcome::Duplicate { seq }),
                    None => Err(AppError::BadRequest(format!(
                        "message {} exists in another conversation",
                        message.message_id
                    ))),
                }
            }
        }
    }

    async fn append_delivery_attempt(
        &self,
        key: &MessageKey,
        attempt: &DeliveryAttempt,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET per_channel_delivery = per_channel_delivery || $3::jsonb,
                updated_at = NOW()
            WHERE message_id = $1 AND conversation_id = $2
            "#,
        )
        .bind(&key.message_id)
        .bind(&key.conversation_id)
        .bind(Json(vec![attempt]))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Message {} not found", key.message_id)));
        }
        Ok(())
    }

    async fn advance_status(
        &self,
        key: &MessageKey,
        target: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<MessageStatus>, AppError> {
        let updated = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE messages
            SET status = $3,
                delivered_at = CASE WHEN $3 = 'DELIVERED' THEN COALESCE(delivered_at, $5)
                                    ELSE delivered_at END,
                read_at = CASE WHEN $3 = 'READ' THEN COALESCE(read_at, $5) ELSE read_at END,
                updated_at = NOW()
            WHERE message_id = $1 AND conversation_id = $2 AND status = ANY($4)
            RETURNING status
            "#,
        )
        .bind(&key.message_id)
        .bind(&key.conversation_id)
        .bind(target.as_str())
        .bind(status_names(target.predecessors()))
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(status) = updated {
            return parse_status(&status).map(Some);
        }

        let current = sqlx::query_scalar::<_, String>(
            "SELECT status FROM messages WHERE message_id = $1 AND conversation_id = $2",
        )
        .bind(&key.message_id)
        .bind(&key.conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        current.as_deref().map(parse_status).transpose()
    }

    #[instrument(skip(self, receipt), fields(message_id = %key.message_id, kind = receipt.kind.as_str()))]
    async fn record_receipt(
        &self,
        key: &MessageKey,
        receipt: &Receipt,
    ) -> Result<ReceiptOutcome, AppError> {
        let target = receipt.kind.target_status();
        let (delivered_to, read_by, delivered_at, read_at) = match receipt.kind {
            ReceiptKind::Delivery => (vec![receipt.actor.clone()], Vec::new(), Some(receipt.at), None),
            ReceiptKind::Read => (Vec::new(), vec![receipt.actor.clone()], None, Some(receipt.at)),
        };

        let row = sqlx::query_as::<_, (String, bool, Option<String>)>(
            r#"
            INSERT INTO messages (
                message_id, conversation_id, status, delivered_to, read_by,
                delivered_at, read_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (message_id) DO UPDATE SET
                status = CASE WHEN messages.status = ANY($8) THEN EXCLUDED.status
                              ELSE messages.status END,
                delivered_to = CASE WHEN EXCLUDED.delivered_to <@ messages.delivered_to
                                    THEN messages.delivered_to
                                    ELSE messages.delivered_to || EXCLUDED.delivered_to END,
                read_by = CASE WHEN EXCLUDED.read_by <@ messages.read_by
                               THEN messages.read_by
                               ELSE messages.read_by || EXCLUDED.read_by END,
                delivered_at = COALESCE(messages.delivered_at, EXCLUDED.delivered_at),
                read_at = COALESCE(messages.read_at, EXCLUDED.read_at),
                updated_at = NOW()
            WHERE messages.conversation_id = EXCLUDED.conversation_id
            RETURNING status, (xmax = 0) AS inserted, sender_id
            "#,
        )
        .bind(&key.message_id)
        .bind(&key.conversation_id)
        .bind(target.as_str())
        .bind(&delivered_to)
        .bind(&read_by)
        .bind(delivered_at)
        .bind(read_at)
        .bind(status_names(target.predecessors()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((status, created, from)) => Ok(ReceiptOutcome {
                status: parse_status(&status)?,
                created,
                from,
            }),
            None => Err(AppError::BadRequest(format!(
                "message {} does not belong to conversation {}",
                key.message_id, key.conversation_id
            ))),
        }
    }

    /// Seq-range page of a conversation.
    ///
    /// `since_seq` is exclusive and `until_seq` inclusive.
    async fn find_by_conversation(
        &self,
        conversation_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<Message>, AppError> {
        let order = if query.reverse { "DESC" } else { "ASC" };
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {}
            FROM messages
            WHERE conversation_id = $1
              AND seq IS NOT NULL
              AND ($2::BIGINT IS NULL OR seq > $2)
              AND ($3::BIGINT IS NULL OR seq <= $3)
            ORDER BY seq {}
            LIMIT $4
            "#,
            MESSAGE_COLUMNS, order
        ))
        .bind(conversation_id)
        .bind(query.since_seq)
        .bind(query.until_seq)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

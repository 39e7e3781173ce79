//! Message entity, delivery status machine and repository trait.
//!
//! Maps to the `messages` table. The canonical record is created by the
//! sequencer and afterwards only ever mutated through partial updates
//! scoped by [`MessageKey`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Destination, Payload};
use crate::shared::error::AppError;

/// Opaque key/value bag carried through the pipeline untouched.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Aggregate delivery status of a message.
///
/// `ACCEPTED -> SENT -> DELIVERED -> READ`, with `FAILED` reachable while no
/// delivery evidence exists. A receipt arriving after `FAILED` proves the
/// message got through, so `FAILED -> DELIVERED | READ` is allowed. `READ` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Accepted,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::Accepted,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
        MessageStatus::Failed,
    ];

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Accepted, Sent | Delivered | Read | Failed)
                | (Sent, Delivered | Read | Failed)
                | (Delivered, Read)
                | (Failed, Delivered | Read)
        )
    }

    /// The status after applying `next`; unchanged when `next` would regress.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        if self.can_transition_to(next) {
            next
        } else {
            self
        }
    }

    /// Every status from which `self` can be reached in one step.
    ///
    /// Stores use this to express forward-only updates as a filter.
    pub fn predecessors(self) -> Vec<MessageStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Accepted => "ACCEPTED",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
            MessageStatus::Failed => "FAILED",
        }
    }

    /// Convert from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One adapter hand-off for a (channel, target) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub channel: String,
    pub target: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

/// Lookup key for partial updates: the message id plus its shard key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub message_id: String,
    pub conversation_id: String,
}

impl MessageKey {
    pub fn new(message_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

/// Canonical message record.
///
/// `from` and `payload` are `None` only on placeholder records created by a
/// receipt that overtook the sequencer; the sequencer fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<Destination>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub payload: Option<Payload>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Per-conversation sequence number, assigned once at persistence time
    pub seq: Option<i64>,
    pub status: MessageStatus,
    #[serde(default)]
    pub per_channel_delivery: Vec<DeliveryAttempt>,
    #[serde(default)]
    pub delivered_to: Vec<String>,
    #[serde(default)]
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// A record is sequenced once the sequencer has written it.
    pub fn is_sequenced(&self) -> bool {
        self.seq.is_some()
    }

    /// Empty record created by an early receipt.
    pub fn placeholder(key: &MessageKey, now: DateTime<Utc>) -> Self {
        Self {
            message_id: key.message_id.clone(),
            conversation_id: key.conversation_id.clone(),
            from: None,
            to: Vec::new(),
            channels: Vec::new(),
            payload: None,
            metadata: Metadata::new(),
            seq: None,
            status: MessageStatus::Accepted,
            per_channel_delivery: Vec::new(),
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            created_at: now,
            updated_at: now,
            delivered_at: None,
            read_at: None,
        }
    }

    /// Apply a status change forward-only, stamping the matching timestamp.
    pub fn apply_status(&mut self, next: MessageStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            MessageStatus::Delivered => {
                self.delivered_at.get_or_insert(at);
            }
            MessageStatus::Read => {
                self.read_at.get_or_insert(at);
            }
            _ => {}
        }
        self.updated_at = Utc::now();
        true
    }

    /// Merge an external receipt: status forward-only, actor added as a set member.
    pub fn apply_receipt(&mut self, receipt: &Receipt) {
        let (target, set) = match receipt.kind {
            ReceiptKind::Delivery => (MessageStatus::Delivered, &mut self.delivered_to),
            ReceiptKind::Read => (MessageStatus::Read, &mut self.read_by),
        };
        if !set.contains(&receipt.actor) {
            set.push(receipt.actor.clone());
        }
        match receipt.kind {
            ReceiptKind::Delivery => {
                self.delivered_at.get_or_insert(receipt.at);
            }
            ReceiptKind::Read => {
                self.read_at.get_or_insert(receipt.at);
            }
        }
        if self.status.can_transition_to(target) {
            self.status = target;
        }
        self.updated_at = Utc::now();
    }
}

/// Kind of asynchronous callback from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivery,
    Read,
}

impl ReceiptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptKind::Delivery => "delivery",
            ReceiptKind::Read => "read",
        }
    }

    pub fn target_status(&self) -> MessageStatus {
        match self {
            ReceiptKind::Delivery => MessageStatus::Delivered,
            ReceiptKind::Read => MessageStatus::Read,
        }
    }
}

/// A delivery or read receipt for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub kind: ReceiptKind,
    /// Recipient (delivery) or reader (read) identity
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Result of writing a new canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Stored with a freshly allocated sequence number
    Inserted { seq: i64, status: MessageStatus },
    /// A sequenced record with this id already exists
    Duplicate { seq: i64 },
}

/// Result of merging a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOutcome {
    pub status: MessageStatus,
    /// A placeholder record had to be created
    pub created: bool,
    /// Sender of the message; unknown until the message itself is persisted
    pub from: Option<String>,
}

/// Seq-range query over one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Exclusive lower bound
    pub since_seq: Option<i64>,
    /// Inclusive upper bound
    pub until_seq: Option<i64>,
    pub limit: i64,
    /// Newest first when true
    pub reverse: bool,
}

/// Repository trait for the canonical message store.
///
/// Every mutation is scoped by [`MessageKey`] so the shard key always
/// accompanies the lookup key.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Find a message by its globally unique id.
    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Message>, AppError>;

    /// Number of sequenced messages in a conversation.
    async fn count_by_conversation(&self, conversation_id: &str) -> Result<i64, AppError>;

    /// Persist a new canonical record, allocating the next per-conversation
    /// sequence number atomically with the write.
    ///
    /// A placeholder left by an early receipt is merged, never downgraded.
    /// A record that already carries a seq yields [`PersistOutcome::Duplicate`]
    /// and is not touched.
    async fn insert_sequenced(&self, message: &Message) -> Result<PersistOutcome, AppError>;

    /// Push one per-channel delivery entry.
    async fn append_delivery_attempt(
        &self,
        key: &MessageKey,
        attempt: &DeliveryAttempt,
    ) -> Result<(), AppError>;

    /// Move the aggregate status forward. Returns the resulting status, or
    /// `None` when no record matches the key.
    async fn advance_status(
        &self,
        key: &MessageKey,
        target: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<MessageStatus>, AppError>;

    /// Upsert a receipt: create a placeholder when absent, otherwise merge.
    async fn record_receipt(
        &self,
        key: &MessageKey,
        receipt: &Receipt,
    ) -> Result<ReceiptOutcome, AppError>;

    /// Sequenced messages of a conversation ordered by seq.
    async fn find_by_conversation(
        &self,
        conversation_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<Message>, AppError>;

    /// Connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), AppError>;
}

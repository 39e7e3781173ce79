//! In-memory message store.
//!
//! Same contract as the PostgreSQL repository, used by the in-memory
//! deployment profile and the tests. Every operation runs under a single
//! lock so each call is atomic, mirroring the store's transactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    DeliveryAttempt, HistoryQuery, Message, MessageKey, MessageRepository, MessageStatus,
    PersistOutcome, Receipt, ReceiptOutcome,
};
use crate::shared::error::AppError;

#[derive(Default)]
struct State {
    messages: HashMap<String, Message>,
    counters: HashMap<String, i64>,
}

impl State {
    fn scoped_mut(&mut self, key: &MessageKey) -> Option<&mut Message> {
        self.messages
            .get_mut(&key.message_id)
            .filter(|m| m.conversation_id == key.conversation_id)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every call fails with a retryable error.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(AppError::Internal("message store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn find_by_message_id(&self, message_id: &str) -> Result<Option<Message>, AppError> {
        self.check()?;
        Ok(self.state.lock().messages.get(message_id).cloned())
    }

    async fn count_by_conversation(&self, conversation_id: &str) -> Result<i64, AppError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.is_sequenced())
            .count() as i64)
    }

    async fn insert_sequenced(&self, message: &Message) -> Result<PersistOutcome, AppError> {
        self.check()?;
        let mut state = self.state.lock();

        if let Some(existing) = state.messages.get(&message.message_id) {
            if let Some(seq) = existing.seq {
                return Ok(PersistOutcome::Duplicate { seq });
            }
            if existing.conversation_id != message.conversation_id {
                return Err(AppError::BadRequest(format!(
                    "message {} exists in another conversation",
                    message.message_id
                )));
            }
        }

        let counter = state
            .counters
            .entry(message.conversation_id.clone())
            .or_insert(0);
        *counter += 1;
        let seq = *counter;

        let record = match state.messages.remove(&message.message_id) {
            Some(placeholder) => Message {
                seq: Some(seq),
                status: placeholder.status.advance(message.status),
                per_channel_delivery: placeholder.per_channel_delivery,
                delivered_to: placeholder.delivered_to,
                read_by: placeholder.read_by,
                delivered_at: placeholder.delivered_at,
                read_at: placeholder.read_at,
                updated_at: Utc::now(),
                ..message.clone()
            },
            None => Message {
                seq: Some(seq),
                ..message.clone()
            },
        };
        let status = record.status;
        state.messages.insert(record.message_id.clone(), record);

        Ok(PersistOutcome::Inserted { seq, status })
    }

    async fn append_delivery_attempt(
        &self,
        key: &MessageKey,
        attempt: &DeliveryAttempt,
    ) -> Result<(), AppError> {
        self.check()?;
        let mut state = self.state.lock();
        let message = state
            .scoped_mut(key)
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", key.message_id)))?;
        message.per_channel_delivery.push(attempt.clone());
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn advance_status(
        &self,
        key: &MessageKey,
        target: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<MessageStatus>, AppError> {
        self.check()?;
        let mut state = self.state.lock();
        Ok(state.scoped_mut(key).map(|message| {
            message.apply_status(target, at);
            message.status
        }))
    }

    async fn record_receipt(
        &self,
        key: &MessageKey,
        receipt: &Receipt,
    ) -> Result<ReceiptOutcome, AppError> {
        self.check()?;
        let mut state = self.state.lock();

        if let Some(existing) = state.messages.get_mut(&key.message_id) {
            if existing.conversation_id != key.conversation_id {
                return Err(AppError::BadRequest(format!(
                    "message {} does not belong to conversation {}",
                    key.message_id, key.conversation_id
                )));
            }
            existing.apply_receipt(receipt);
            return Ok(ReceiptOutcome {
                status: existing.status,
                created: false,
                from: existing.from.clone(),
            });
        }

        let mut placeholder = Message::placeholder(key, Utc::now());
        placeholder.apply_receipt(receipt);
        let status = placeholder.status;
        state.messages.insert(key.message_id.clone(), placeholder);
        Ok(ReceiptOutcome {
            status,
            created: true,
            from: None,
        })
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<Message>, AppError> {
        self.check()?;
        let state = self.state.lock();
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| match m.seq {
                Some(seq) => {
                    query.since_seq.is_none_or(|since| seq > since)
                        && query.until_seq.is_none_or(|until| seq <= until)
                }
                None => false,
            })
            .cloned()
            .collect();

        messages.sort_by_key(|m| m.seq);
        if query.reverse {
            messages.reverse();
        }
        messages.truncate(query.limit.max(0) as usize);
        Ok(messages)
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check()
    }
}

//! Message Bus Module
//!
//! Partitioned, ordered-per-partition publish/subscribe log used between
//! pipeline stages.
//!
//! This module provides:
//! - A `MessageBus` trait for publishing and opening partition subscriptions
//! - A `RedisStreamsBus` backed by one Redis stream per (topic, partition)
//! - An `InMemoryBus` with the same delivery semantics for tests and local runs
//! - A consumer runner driving one sequential loop per owned partition
//!
//! # Delivery semantics
//!
//! A group subscription hands out the oldest record its group has not
//! committed. Until that record is committed the same record is handed out
//! again, so a partition is processed strictly in order and at least once.
//! At most one group subscription per (topic, group, partition) is open at a
//! time, across every process sharing the transport.
//!
//! A tail subscription follows records published after it was opened. It
//! keeps no shared position: every tail sees every record.
//!
//! ```text
//! publish(topic, key) --> partition_for(key) --> [topic:p] --> subscription(group, p)
//! ```

mod consumer;
mod memory;
mod redis_streams;

pub use consumer::{spawn_consumers, ConsumeMode, ConsumerSpec, RecordHandler};
pub use memory::InMemoryBus;
pub use redis_streams::RedisStreamsBus;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed bus record: {0}")]
    Malformed(String),

    #[error("partition {partition} out of range for {partitions} partitions")]
    PartitionOutOfRange { partition: u32, partitions: u32 },

    #[error("partition already claimed: {0}")]
    Claimed(String),

    #[error("partition claim lost: {0}")]
    LeaseLost(String),
}

/// Record to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    /// Partitioning key
    pub key: String,
    /// Explicit partition; derived from `key` when unset
    pub partition: Option<u32>,
    pub value: String,
    pub headers: HashMap<String, String>,
}

impl OutboundRecord {
    /// JSON-encode `value` under `key`.
    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            key: key.into(),
            partition: None,
            value: serde_json::to_string(value)?,
            headers: HashMap::new(),
        })
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// Record received from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct BusRecord {
    pub topic: String,
    pub partition: u32,
    /// Transport position, unique within the partition
    pub id: String,
    pub key: String,
    pub value: String,
    pub headers: HashMap<String, String>,
}

impl BusRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Partitioned publish/subscribe log.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Partitions per topic.
    fn partitions(&self) -> u32;

    /// Append a record once the transport acknowledges it, retrying
    /// transient failures per the client's retry policy.
    async fn publish(&self, topic: &str, record: OutboundRecord) -> Result<(), BusError>;

    /// Open the ordered subscription on one partition of `topic` for `group`.
    ///
    /// A group starts from the oldest retained record. Fails with
    /// [`BusError::Claimed`] while another subscription for the same
    /// partition and group is open.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Follow records appended to one partition of `topic` from now on.
    async fn tail(&self, topic: &str, partition: u32) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), BusError>;
}

/// Sequential reader of one partition for one consumer group.
#[async_trait]
pub trait BusSubscription: Send {
    /// Oldest uncommitted record, waiting up to `timeout` for one to arrive.
    ///
    /// [`BusError::LeaseLost`] means the partition now belongs to someone
    /// else; the subscription must be dropped.
    async fn next(&mut self, timeout: Duration) -> Result<Option<BusRecord>, BusError>;

    /// Mark `record` processed so the group moves past it.
    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError>;
}

/// Header names attached by the ingest publisher.
pub mod headers {
    pub const MESSAGE_ID: &str = "message-id";
    pub const CONVERSATION_ID: &str = "conversation-id";
    pub const FROM: &str = "from";
    pub const TIMESTAMP: &str = "timestamp";
}

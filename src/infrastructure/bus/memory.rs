//! In-process bus with per-group committed offsets.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::{BusError, BusRecord, BusSubscription, MessageBus, OutboundRecord};
use crate::domain::partition_for;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    value: String,
    headers: HashMap<String, String>,
}

#[derive(Default)]
struct PartitionLog {
    records: Vec<StoredRecord>,
    /// Next offset to hand out, per consumer group
    committed: HashMap<String, usize>,
    /// Groups with an open subscription
    holders: HashSet<String>,
}

struct Partition {
    log: Mutex<PartitionLog>,
    appended: watch::Sender<usize>,
}

impl Partition {
    fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            log: Mutex::new(PartitionLog::default()),
            appended,
        }
    }
}

/// Bus living entirely in process memory.
///
/// Records are retained for the lifetime of the bus, so a subscription
/// reopened for the same group resumes at the group's committed offset.
/// A group's claim on a partition ends when its subscription is dropped.
pub struct InMemoryBus {
    partitions: u32,
    topics: RwLock<HashMap<String, Arc<Vec<Partition>>>>,
    available: AtomicBool,
}

impl InMemoryBus {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    fn topic(&self, topic: &str) -> Arc<Vec<Partition>> {
        if let Some(partitions) = self.topics.read().get(topic) {
            return partitions.clone();
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new((0..self.partitions).map(|_| Partition::new()).collect()))
            .clone()
    }

    /// Simulate a broker outage: publishes fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_partition(&self, partition: u32) -> Result<(), BusError> {
        if partition >= self.partitions {
            return Err(BusError::PartitionOutOfRange {
                partition,
                partitions: self.partitions,
            });
        }
        Ok(())
    }

    /// Every record published to `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<BusRecord> {
        let partitions = self.topic(topic);
        partitions
            .iter()
            .enumerate()
            .flat_map(|(index, partition)| {
                let log = partition.log.lock();
                log.records
                    .iter()
                    .enumerate()
                    .map(|(offset, record)| to_bus_record(topic, index as u32, offset, record))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn to_bus_record(topic: &str, partition: u32, offset: usize, record: &StoredRecord) -> BusRecord {
    BusRecord {
        topic: topic.to_string(),
        partition,
        id: offset.to_string(),
        key: record.key.clone(),
        value: record.value.clone(),
        headers: record.headers.clone(),
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, topic: &str, record: OutboundRecord) -> Result<(), BusError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("in-memory bus is offline".into()));
        }
        let index = match record.partition {
            Some(p) if p >= self.partitions => {
                return Err(BusError::PartitionOutOfRange {
                    partition: p,
                    partitions: self.partitions,
                })
            }
            Some(p) => p,
            None => partition_for(&record.key, self.partitions),
        };

        let partitions = self.topic(topic);
        let partition = &partitions[index as usize];
        let len = {
            let mut log = partition.log.lock();
            log.records.push(StoredRecord {
                key: record.key,
                value: record.value,
                headers: record.headers,
            });
            log.records.len()
        };
        partition.appended.send_replace(len);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        self.check_partition(partition)?;
        let partitions = self.topic(topic);
        let appended = {
            let target = &partitions[partition as usize];
            let mut log = target.log.lock();
            if !log.holders.insert(group.to_string()) {
                return Err(BusError::Claimed(format!(
                    "{}:{} for group {}",
                    topic, partition, group
                )));
            }
            log.committed.entry(group.to_string()).or_insert(0);
            target.appended.subscribe()
        };

        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            cursor: Cursor::Group(group.to_string()),
            partition,
            partitions,
            appended,
        }))
    }

    async fn tail(&self, topic: &str, partition: u32) -> Result<Box<dyn BusSubscription>, BusError> {
        self.check_partition(partition)?;
        let partitions = self.topic(topic);
        let (next, appended) = {
            let target = &partitions[partition as usize];
            let log = target.log.lock();
            (log.records.len(), target.appended.subscribe())
        };

        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            cursor: Cursor::Tail(next),
            partition,
            partitions,
            appended,
        }))
    }

    async fn ping(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("in-memory bus is offline".into()))
        }
    }
}

/// Where a subscription reads next.
enum Cursor {
    /// Shared committed offset of a consumer group
    Group(String),
    /// Private offset of a tail
    Tail(usize),
}

struct InMemorySubscription {
    topic: String,
    cursor: Cursor,
    partition: u32,
    partitions: Arc<Vec<Partition>>,
    appended: watch::Receiver<usize>,
}

impl InMemorySubscription {
    fn pending(&self) -> Option<BusRecord> {
        let log = self.partitions[self.partition as usize].log.lock();
        let offset = match &self.cursor {
            Cursor::Group(group) => log.committed.get(group).copied().unwrap_or(0),
            Cursor::Tail(next) => *next,
        };
        log.records
            .get(offset)
            .map(|record| to_bus_record(&self.topic, self.partition, offset, record))
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        if let Cursor::Group(group) = &self.cursor {
            self.partitions[self.partition as usize]
                .log
                .lock()
                .holders
                .remove(group);
        }
    }
}

#[async_trait]
impl BusSubscription for InMemorySubscription {
    async fn next(&mut self, timeout: Duration) -> Result<Option<BusRecord>, BusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.appended.borrow_and_update();
            if let Some(record) = self.pending() {
                return Ok(Some(record));
            }
            match tokio::time::timeout_at(deadline, self.appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError> {
        let offset: usize = record
            .id
            .parse()
            .map_err(|_| BusError::Malformed(format!("offset {}", record.id)))?;
        match &mut self.cursor {
            Cursor::Group(group) => {
                let mut log = self.partitions[self.partition as usize].log.lock();
                let committed = log.committed.entry(group.clone()).or_insert(0);
                if offset + 1 > *committed {
                    *committed = offset + 1;
                }
            }
            Cursor::Tail(next) => *next = (*next).max(offset + 1),
        }
        Ok(())
    }
}

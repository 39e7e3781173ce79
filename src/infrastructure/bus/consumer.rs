//! Partition consumer runner.
//!
//! Spawns one task per owned partition. Each task processes its partition
//! strictly sequentially: a record is committed only after the handler
//! finishes with it, and the next record becomes visible only then.
//! A group loop whose partition is claimed elsewhere waits for the claim.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BusError, BusRecord, BusSubscription, MessageBus};
use crate::config::BusSettings;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Processes one bus record.
///
/// Returning a retryable error leaves the record uncommitted so it is
/// handed out again; any other error drops the record.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &BusRecord) -> Result<(), AppError>;
}

/// How a loop reads its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeMode {
    /// Exclusive member of a consumer group, from the group's committed position
    Group(String),
    /// Private tail of new records
    Tail,
}

/// What to consume and as whom.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Worker name used in logs and metrics
    pub name: &'static str,
    pub topic: String,
    pub mode: ConsumeMode,
    pub partitions: Vec<u32>,
}

/// Spawn a sequential consumption loop per partition of `spec`.
///
/// Loops exit after their current record once `shutdown` flips to `true`.
pub fn spawn_consumers(
    bus: Arc<dyn MessageBus>,
    spec: ConsumerSpec,
    handler: Arc<dyn RecordHandler>,
    settings: &BusSettings,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    spec.partitions
        .iter()
        .map(|&partition| {
            let worker = PartitionWorker {
                bus: bus.clone(),
                spec: spec.clone(),
                partition,
                handler: handler.clone(),
                settings: settings.clone(),
                shutdown: shutdown.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect()
}

struct PartitionWorker {
    bus: Arc<dyn MessageBus>,
    spec: ConsumerSpec,
    partition: u32,
    handler: Arc<dyn RecordHandler>,
    settings: BusSettings,
    shutdown: watch::Receiver<bool>,
}

/// Delivery attempts of the record currently at the head of the partition.
struct Attempts {
    record_id: Option<String>,
    count: u32,
}

impl Attempts {
    fn observe(&mut self, record: &BusRecord) -> u32 {
        if self.record_id.as_deref() == Some(record.id.as_str()) {
            self.count += 1;
        } else {
            self.record_id = Some(record.id.clone());
            self.count = 1;
        }
        self.count
    }
}

impl PartitionWorker {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn pause(&mut self) {
        let backoff = self.settings.redelivery_backoff();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn open(&mut self) -> Option<Box<dyn BusSubscription>> {
        loop {
            if self.stopping() {
                return None;
            }
            let opened = match &self.spec.mode {
                ConsumeMode::Group(group) => {
                    self.bus.subscribe(&self.spec.topic, group, self.partition).await
                }
                ConsumeMode::Tail => self.bus.tail(&self.spec.topic, self.partition).await,
            };
            match opened {
                Ok(subscription) => return Some(subscription),
                Err(BusError::Claimed(claim)) => {
                    debug!(
                        worker = self.spec.name,
                        partition = self.partition,
                        claim = %claim,
                        "Partition held by another consumer, waiting"
                    );
                    self.pause().await;
                }
                Err(e) => {
                    error!(
                        worker = self.spec.name,
                        topic = %self.spec.topic,
                        partition = self.partition,
                        error = %e,
                        "Failed to subscribe, retrying"
                    );
                    self.pause().await;
                }
            }
        }
    }

    async fn run(mut self) {
        let Some(mut subscription) = self.open().await else {
            return;
        };
        info!(
            worker = self.spec.name,
            topic = %self.spec.topic,
            mode = ?self.spec.mode,
            partition = self.partition,
            "Consumer started"
        );

        let poll_timeout = self.settings.poll_timeout();
        let mut attempts = Attempts {
            record_id: None,
            count: 0,
        };

        while !self.stopping() {
            let polled = tokio::select! {
                polled = subscription.next(poll_timeout) => polled,
                _ = self.shutdown.changed() => break,
            };

            let record = match polled {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(BusError::LeaseLost(claim)) => {
                    warn!(
                        worker = self.spec.name,
                        partition = self.partition,
                        claim = %claim,
                        "Partition claim lost, reclaiming"
                    );
                    drop(subscription);
                    match self.open().await {
                        Some(reopened) => {
                            subscription = reopened;
                            continue;
                        }
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(
                        worker = self.spec.name,
                        partition = self.partition,
                        error = %e,
                        "Poll failed"
                    );
                    self.pause().await;
                    continue;
                }
            };

            let delivery = attempts.observe(&record);
            let commit = match self.handler.handle(&record).await {
                Ok(()) => {
                    metrics::record_consumed(&record.topic, "processed");
                    true
                }
                Err(e) if e.is_retryable() && delivery < self.settings.max_deliveries => {
                    warn!(
                        worker = self.spec.name,
                        partition = self.partition,
                        record_id = %record.id,
                        delivery,
                        error = %e,
                        "Record processing failed, will be redelivered"
                    );
                    metrics::record_consumed(&record.topic, "retried");
                    false
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        worker = self.spec.name,
                        partition = self.partition,
                        record_id = %record.id,
                        key = %record.key,
                        delivery,
                        error = %e,
                        "Record failed permanently, skipping"
                    );
                    metrics::record_consumed(&record.topic, "failed");
                    true
                }
                Err(e) => {
                    warn!(
                        worker = self.spec.name,
                        partition = self.partition,
                        record_id = %record.id,
                        error = %e,
                        "Record dropped"
                    );
                    metrics::record_consumed(&record.topic, "dropped");
                    true
                }
            };

            if !commit {
                self.pause().await;
                continue;
            }
            if let Err(e) = subscription.commit(&record).await {
                // Redelivery is absorbed by the idempotent handlers.
                warn!(
                    worker = self.spec.name,
                    partition = self.partition,
                    record_id = %record.id,
                    error = %e,
                    "Commit failed"
                );
            } else {
                debug!(worker = self.spec.name, partition = self.partition, record_id = %record.id, "Committed");
            }
        }

        info!(worker = self.spec.name, partition = self.partition, "Consumer stopped");
    }
}

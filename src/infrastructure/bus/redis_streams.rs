//! Redis Streams transport.
//!
//! One stream per (topic, partition) named `{topic}:{partition}`. Appends
//! are capped with `MAXLEN ~` so streams stay bounded.
//!
//! Consumer groups map onto Redis consumer groups. A group subscription
//! first takes a lease key (`SET NX PX`) for its (stream, group) pair and
//! keeps renewing it; whoever holds the lease reads as the partition's single
//! consumer name and so inherits entries a previous holder left pending.
//! Tails read with plain `XREAD` and create nothing on the server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use redis::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{BusError, BusRecord, BusSubscription, MessageBus, OutboundRecord};
use crate::config::BusSettings;
use crate::domain::partition_for;

const FIELD_KEY: &str = "key";
const FIELD_VALUE: &str = "value";
const FIELD_HEADERS: &str = "headers";

/// Extend the lease only while we still own it.
const RENEW_LEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Delete the lease only while we still own it.
const RELEASE_LEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn stream_key(topic: &str, partition: u32) -> String {
    format!("{}:{}", topic, partition)
}

fn lease_key(stream: &str, group: &str) -> String {
    format!("{}:lease:{}", stream, group)
}

/// Bus backed by Redis Streams.
pub struct RedisStreamsBus {
    client: Client,
    conn: ConnectionManager,
    /// Lease owner token, unique per process
    owner: String,
    partitions: u32,
    max_len: u64,
    lease_ttl: Duration,
    publish_retries: u32,
    initial_backoff: Duration,
}

impl RedisStreamsBus {
    /// Connect to Redis and verify the connection.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(url: &str, settings: &BusSettings) -> Result<Self, BusError> {
        info!("Connecting message bus to Redis...");
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let bus = Self {
            client,
            conn,
            owner: format!("{}-{}", settings.client_id, Uuid::new_v4()),
            partitions: settings.partitions,
            max_len: settings.stream_max_len,
            lease_ttl: settings.lease_ttl(),
            publish_retries: settings.publish_retries,
            initial_backoff: Duration::from_millis(settings.retry_initial_backoff_ms),
        };
        bus.ping().await?;
        info!(partitions = bus.partitions, owner = %bus.owner, "Message bus connected");
        Ok(bus)
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

    async fn xadd(&self, key: &str, record: &OutboundRecord) -> Result<String, BusError> {
        let headers = serde_json::to_string(&record.headers)
            .map_err(|e| BusError::Malformed(e.to_string()))?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key);
        if self.max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.max_len);
        }
        cmd.arg("*")
            .arg(FIELD_KEY)
            .arg(&record.key)
            .arg(FIELD_VALUE)
            .arg(&record.value)
            .arg(FIELD_HEADERS)
            .arg(headers);

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }
}

#[async_trait]
impl MessageBus for RedisStreamsBus {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    #[instrument(skip(self, record), fields(key = %record.key))]
    async fn publish(&self, topic: &str, record: OutboundRecord) -> Result<(), BusError> {
        let partition = match record.partition {
            Some(p) => {
                self.check_partition(p)?;
                p
            }
            None => partition_for(&record.key, self.partitions),
        };
        let key = stream_key(topic, partition);

        let mut attempt = 0;
        loop {
            match self.xadd(&key, &record).await {
                Ok(id) => {
                    debug!(stream = %key, id = %id, "Record published");
                    return Ok(());
                }
                Err(BusError::Redis(e)) if attempt < self.publish_retries => {
                    let backoff = self.initial_backoff * 2u32.saturating_pow(attempt);
                    let jitter_ms = rand::rng().random_range(0..=backoff.as_millis() as u64 / 2);
                    let delay = backoff + Duration::from_millis(jitter_ms);
                    warn!(stream = %key, attempt, error = %e, ?delay, "Publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(BusError::Redis(e)) => {
                    return Err(BusError::Unavailable(format!(
                        "publish to {} failed after {} retries: {}",
                        key, self.publish_retries, e
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self))]
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        self.check_partition(partition)?;
        let key = stream_key(topic, partition);
        // Blocking reads hold the connection, so every subscription gets its own.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => info!(stream = %key, group, "Consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        let lease = PartitionLease::acquire(
            self.conn.clone(),
            lease_key(&key, group),
            self.owner.clone(),
            self.lease_ttl,
        )
        .await?
        .ok_or_else(|| BusError::Claimed(format!("{} for group {}", key, group)))?;
        info!(stream = %key, group, "Partition lease acquired");

        Ok(Box::new(GroupSubscription {
            conn,
            topic: topic.to_string(),
            key,
            group: group.to_string(),
            consumer: format!("partition-{}", partition),
            partition,
            lease,
        }))
    }

    #[instrument(skip(self))]
    async fn tail(&self, topic: &str, partition: u32) -> Result<Box<dyn BusSubscription>, BusError> {
        self.check_partition(partition)?;
        let key = stream_key(topic, partition);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let newest: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;
        let last_id = newest
            .ids
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .unwrap_or_else(|| "0-0".to_string());

        Ok(Box::new(TailSubscription {
            conn,
            topic: topic.to_string(),
            key,
            partition,
            last_id,
        }))
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Exclusive claim on one (stream, group) pair, renewed in the background
/// and released on drop.
struct PartitionLease {
    key: String,
    owner: String,
    conn: ConnectionManager,
    lost: Arc<AtomicBool>,
    renewer: JoinHandle<()>,
}

impl PartitionLease {
    /// `None` when someone else holds the lease.
    async fn acquire(
        conn: ConnectionManager,
        key: String,
        owner: String,
        ttl: Duration,
    ) -> Result<Option<Self>, BusError> {
        let mut setter = conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut setter)
            .await?;
        if acquired.is_none() {
            return Ok(None);
        }

        let lost = Arc::new(AtomicBool::new(false));
        let renewer = tokio::spawn(renew_lease(
            conn.clone(),
            key.clone(),
            owner.clone(),
            ttl,
            lost.clone(),
        ));
        Ok(Some(Self {
            key,
            owner,
            conn,
            lost,
            renewer,
        }))
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for PartitionLease {
    fn drop(&mut self) {
        self.renewer.abort();
        if self.is_lost() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut conn = self.conn.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        runtime.spawn(async move {
            let released: redis::RedisResult<i64> = redis::cmd("EVAL")
                .arg(RELEASE_LEASE)
                .arg(1)
                .arg(&key)
                .arg(&owner)
                .query_async(&mut conn)
                .await;
            match released {
                Ok(_) => debug!(lease = %key, "Partition lease released"),
                Err(e) => warn!(lease = %key, error = %e, "Partition lease not released; it will expire"),
            }
        });
    }
}

/// Renew every third of the TTL until the lease is found in other hands.
async fn renew_lease(
    mut conn: ConnectionManager,
    key: String,
    owner: String,
    ttl: Duration,
    lost: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(ttl / 3);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let renewed: redis::RedisResult<i64> = redis::cmd("EVAL")
            .arg(RENEW_LEASE)
            .arg(1)
            .arg(&key)
            .arg(&owner)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await;
        match renewed {
            Ok(1) => {}
            Ok(_) => {
                warn!(lease = %key, "Partition lease expired or taken over");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            // An unreachable server lets the lease lapse; the next answer says so.
            Err(e) => warn!(lease = %key, error = %e, "Partition lease renewal failed"),
        }
    }
}

fn to_record(topic: &str, partition: u32, entry: &StreamId) -> Option<BusRecord> {
    let value: String = entry.get(FIELD_VALUE)?;
    let key: String = entry.get(FIELD_KEY).unwrap_or_default();
    let headers = entry
        .get::<String>(FIELD_HEADERS)
        .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
        .unwrap_or_default();
    Some(BusRecord {
        topic: topic.to_string(),
        partition,
        id: entry.id.clone(),
        key,
        value,
        headers,
    })
}

fn first_entry(reply: Option<StreamReadReply>) -> Option<StreamId> {
    reply
        .and_then(|reply| reply.keys.into_iter().next())
        .and_then(|stream| stream.ids.into_iter().next())
}

struct GroupSubscription {
    conn: MultiplexedConnection,
    topic: String,
    key: String,
    group: String,
    consumer: String,
    partition: u32,
    lease: PartitionLease,
}

impl GroupSubscription {
    async fn read(&mut self, id: &str, block: Option<Duration>) -> Result<Option<StreamId>, BusError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&self.group).arg(&self.consumer).arg("COUNT").arg(1);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(&self.key).arg(id);

        let reply: Option<StreamReadReply> = cmd.query_async(&mut self.conn).await?;
        Ok(first_entry(reply))
    }

    async fn ack(&mut self, id: &str) -> Result<(), BusError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.key)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BusSubscription for GroupSubscription {
    async fn next(&mut self, timeout: Duration) -> Result<Option<BusRecord>, BusError> {
        if self.lease.is_lost() {
            return Err(BusError::LeaseLost(format!("{} for group {}", self.key, self.group)));
        }
        // Pending first: an entry delivered but never acknowledged.
        let entry = match self.read("0", None).await? {
            Some(entry) => Some(entry),
            None => self.read(">", Some(timeout)).await?,
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        match to_record(&self.topic, self.partition, &entry) {
            Some(record) => Ok(Some(record)),
            None => {
                // Trimmed or foreign entry without a value; nothing to process.
                warn!(stream = %self.key, id = %entry.id, "Skipping stream entry without value");
                self.ack(&entry.id).await?;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError> {
        self.ack(&record.id).await
    }
}

struct TailSubscription {
    conn: MultiplexedConnection,
    topic: String,
    key: String,
    partition: u32,
    /// Last committed entry id
    last_id: String,
}

#[async_trait]
impl BusSubscription for TailSubscription {
    async fn next(&mut self, timeout: Duration) -> Result<Option<BusRecord>, BusError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(timeout.as_millis().max(1) as u64)
            .arg("STREAMS")
            .arg(&self.key)
            .arg(&self.last_id)
            .query_async(&mut self.conn)
            .await?;
        let Some(entry) = first_entry(reply) else {
            return Ok(None);
        };

        match to_record(&self.topic, self.partition, &entry) {
            Some(record) => Ok(Some(record)),
            None => {
                warn!(stream = %self.key, id = %entry.id, "Skipping stream entry without value");
                self.last_id = entry.id;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError> {
        self.last_id = record.id.clone();
        Ok(())
    }
}

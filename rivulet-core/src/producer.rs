//! # Producer
//!
//! Asynchronous, typed writer into broker topics.
//!
//! ```text
//! send() ──serialize + partition──▶ bounded queue ──▶ I/O thread ──▶ Broker::append
//!    │                                                      │
//!    └──────────────── DeliveryReceipt ◀──── ack ───────────┘
//! ```
//!
//! The queue is a bounded crossbeam channel, so `send` blocks when the I/O
//! thread falls behind. Transient broker errors are retried with a fixed
//! backoff; anything else, or exhausted retries, fails the receipt.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Condvar, Mutex};

use crate::broker::Broker;
use crate::codec::Serde;
use crate::error::{BrokerError, Result, StreamsError};
use crate::partitioner::{DefaultPartitioner, Partitioner};
use crate::time::current_time_ms;
use crate::types::{EventTime, PartitionId, RecordMetadata};

/// Append with retries on transient failures.
///
/// Shared by the producer I/O thread and the runtime's sink stages.
#[allow(clippy::too_many_arguments)]
pub(crate) fn append_with_retry(
    broker: &Broker,
    topic: &str,
    partition: PartitionId,
    key: Bytes,
    value: Bytes,
    timestamp: EventTime,
    retries: u32,
    backoff: Duration,
) -> Result<RecordMetadata, BrokerError> {
    let mut attempt = 0;
    loop {
        match broker.append(topic, partition, key.clone(), value.clone(), timestamp) {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                tracing::warn!(topic, partition, attempt, retries, error = %e, "append failed, retrying");
                thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

#[derive(Clone)]
pub struct ProducerConfig {
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Capacity of the send queue.
    pub queue_capacity: usize,
    /// Topic used by [`Producer::send_default`].
    pub default_topic: Option<String>,
    pub partitioner: Arc<dyn Partitioner>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_backoff: Duration::from_millis(50),
            queue_capacity: 1024,
            default_topic: None,
            partitioner: Arc::new(DefaultPartitioner),
        }
    }
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("retries", &self.retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("queue_capacity", &self.queue_capacity)
            .field("default_topic", &self.default_topic)
            .finish()
    }
}

/// Completion handle for one send.
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: Receiver<Result<RecordMetadata>>,
}

impl DeliveryReceipt {
    /// Block until the record is appended (or has definitely failed).
    pub fn wait(self) -> Result<RecordMetadata> {
        self.rx.recv().map_err(|_| {
            StreamsError::Producer("producer closed before the record was delivered".to_string())
        })?
    }
}

struct PendingRecord {
    topic: String,
    partition: PartitionId,
    key: Bytes,
    value: Bytes,
    timestamp: EventTime,
    ack: Sender<Result<RecordMetadata>>,
}

/// Counts sends that have been queued but not yet acknowledged.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

pub struct Producer<K, V> {
    broker: Arc<Broker>,
    key_serde: Arc<dyn Serde<K>>,
    value_serde: Arc<dyn Serde<V>>,
    config: ProducerConfig,
    tx: Option<Sender<PendingRecord>>,
    io_thread: Option<JoinHandle<()>>,
    in_flight: Arc<InFlight>,
}

impl<K: 'static, V: 'static> Producer<K, V> {
    pub fn new(
        broker: Arc<Broker>,
        key_serde: impl Serde<K> + 'static,
        value_serde: impl Serde<V> + 'static,
        config: ProducerConfig,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<PendingRecord>(config.queue_capacity.max(1));
        let in_flight = Arc::new(InFlight::default());

        let io_broker = Arc::clone(&broker);
        let io_in_flight = Arc::clone(&in_flight);
        let retries = config.retries;
        let backoff = config.retry_backoff;
        let io_thread = thread::Builder::new()
            .name("rivulet-producer-io".to_string())
            .spawn(move || {
                for pending in rx {
                    let result = append_with_retry(
                        &io_broker,
                        &pending.topic,
                        pending.partition,
                        pending.key,
                        pending.value,
                        pending.timestamp,
                        retries,
                        backoff,
                    )
                    .map_err(StreamsError::from);
                    if let Err(e) = &result {
                        tracing::error!(topic = %pending.topic, error = %e, "send failed");
                    }
                    // The caller may have dropped its receipt.
                    let _ = pending.ack.send(result);
                    io_in_flight.done();
                }
            })
            .map_err(|e| StreamsError::Thread(format!("spawn producer I/O thread: {e}")))?;

        Ok(Self {
            broker,
            key_serde: Arc::new(key_serde),
            value_serde: Arc::new(value_serde),
            config,
            tx: Some(tx),
            io_thread: Some(io_thread),
            in_flight,
        })
    }

    /// Send with the current wall-clock time as timestamp.
    pub fn send(&self, topic: &str, key: &K, value: &V) -> Result<DeliveryReceipt> {
        self.send_at(topic, key, value, current_time_ms())
    }

    pub fn send_at(
        &self,
        topic: &str,
        key: &K,
        value: &V,
        timestamp: EventTime,
    ) -> Result<DeliveryReceipt> {
        let key = self.key_serde.serialize(topic, key)?;
        let partition_count = self.broker.topic(topic)?.partition_count();
        let partition = self
            .config
            .partitioner
            .partition(topic, &key, partition_count);
        let value = self.value_serde.serialize(topic, value)?;
        self.enqueue(topic, partition, key, value, timestamp)
    }

    /// Bypass the partitioner and write to `partition` directly.
    pub fn send_to_partition(
        &self,
        topic: &str,
        partition: PartitionId,
        key: &K,
        value: &V,
        timestamp: EventTime,
    ) -> Result<DeliveryReceipt> {
        let key = self.key_serde.serialize(topic, key)?;
        let value = self.value_serde.serialize(topic, value)?;
        self.enqueue(topic, partition, key, value, timestamp)
    }

    /// Send to the configured default topic.
    pub fn send_default(&self, key: &K, value: &V) -> Result<DeliveryReceipt> {
        let topic = self.config.default_topic.as_deref().ok_or_else(|| {
            StreamsError::Producer("no default topic configured".to_string())
        })?;
        self.send(topic, key, value)
    }

    fn enqueue(
        &self,
        topic: &str,
        partition: PartitionId,
        key: Bytes,
        value: Bytes,
        timestamp: EventTime,
    ) -> Result<DeliveryReceipt> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| StreamsError::Producer("producer is closed".to_string()))?;
        let (ack, rx) = bounded(1);
        self.in_flight.begin();
        let pending = PendingRecord {
            topic: topic.to_string(),
            partition,
            key,
            value,
            timestamp,
            ack,
        };
        if tx.send(pending).is_err() {
            self.in_flight.done();
            return Err(StreamsError::Producer("producer I/O thread exited".to_string()));
        }
        Ok(DeliveryReceipt { rx })
    }

    /// Block until every record sent so far has been acknowledged.
    pub fn flush(&self) {
        self.in_flight.wait_drained();
    }
}

impl<K, V> Producer<K, V> {
    /// Drain the queue and stop the I/O thread. Further sends fail.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                tracing::error!("producer I/O thread panicked");
            }
        }
    }
}

impl<K, V> Drop for Producer<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/producer_tests.rs"]
mod tests;

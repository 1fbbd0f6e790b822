//! # Broker
//!
//! An in-process set of named, partitioned, append-only topic logs.
//!
//! - Appends assign strictly increasing offsets per partition (0, 1, 2, ...).
//! - [`Broker::poll`] blocks on a condition variable until any watched
//!   partition has data or the timeout expires, so a caller's shutdown flag
//!   is observed within one poll timeout.
//! - Committed offsets are stored per consumer group. The committed value is
//!   the offset of the next record to read.
//! - [`Broker::set_available`] simulates an outage: appends and fetches fail
//!   with the transient [`BrokerError::Unavailable`] until it is lifted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::BrokerError;
use crate::types::{EventTime, Offset, PartitionId, RawRecord, RecordMetadata, TopicPartition};

/// A named topic with a fixed number of partitions.
#[derive(Debug)]
pub struct Topic {
    name: String,
    partitions: Vec<RwLock<Vec<RawRecord>>>,
}

impl Topic {
    fn new(name: String, partition_count: u32) -> Self {
        Self {
            name,
            partitions: (0..partition_count).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn log(&self, partition: PartitionId) -> Result<&RwLock<Vec<RawRecord>>, BrokerError> {
        self.partitions
            .get(partition as usize)
            .ok_or_else(|| BrokerError::UnknownPartition(TopicPartition::new(&self.name, partition)))
    }

    fn append(
        &self,
        partition: PartitionId,
        key: Bytes,
        value: Bytes,
        timestamp: EventTime,
    ) -> Result<Offset, BrokerError> {
        let mut log = self.log(partition)?.write();
        let offset = log.len() as Offset;
        log.push(RawRecord {
            key,
            value,
            timestamp,
            partition,
            offset,
        });
        Ok(offset)
    }

    /// Offset the next appended record will receive.
    pub fn end_offset(&self, partition: PartitionId) -> Result<Offset, BrokerError> {
        Ok(self.log(partition)?.read().len() as Offset)
    }

    /// Read up to `max` records starting at `from`. Never blocks.
    pub fn read(
        &self,
        partition: PartitionId,
        from: Offset,
        max: usize,
    ) -> Result<Vec<RawRecord>, BrokerError> {
        let log = self.log(partition)?.read();
        let start = (from as usize).min(log.len());
        let end = start.saturating_add(max).min(log.len());
        Ok(log[start..end].to_vec())
    }
}

/// In-process message broker.
pub struct Broker {
    address: String,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    committed: Mutex<HashMap<(String, TopicPartition), Offset>>,
    available: AtomicBool,
    /// Bumped on every append; pollers wait for it to change.
    generation: Mutex<u64>,
    appended: Condvar,
}

impl Broker {
    /// Create an empty broker advertised under `address` (e.g. `localhost:9092`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topics: RwLock::new(HashMap::new()),
            committed: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            generation: Mutex::new(0),
            appended: Condvar::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn create_topic(&self, name: &str, partitions: u32) -> Result<Arc<Topic>, BrokerError> {
        if partitions == 0 {
            return Err(BrokerError::NoPartitions(name.to_string()));
        }
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return Err(BrokerError::TopicExists(name.to_string()));
        }
        let topic = Arc::new(Topic::new(name.to_string(), partitions));
        topics.insert(name.to_string(), Arc::clone(&topic));
        tracing::debug!(topic = name, partitions, "created topic");
        Ok(topic)
    }

    /// Create the topic unless it already exists, returning the live topic either way.
    pub fn ensure_topic(&self, name: &str, partitions: u32) -> Result<Arc<Topic>, BrokerError> {
        match self.create_topic(name, partitions) {
            Err(BrokerError::TopicExists(_)) => self.topic(name),
            other => other,
        }
    }

    pub fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        self.topics
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }

    pub fn topic(&self, name: &str) -> Result<Arc<Topic>, BrokerError> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable(self.address.clone()))
        }
    }

    /// Append one record and wake up blocked pollers.
    pub fn append(
        &self,
        topic: &str,
        partition: PartitionId,
        key: Bytes,
        value: Bytes,
        timestamp: EventTime,
    ) -> Result<RecordMetadata, BrokerError> {
        self.check_available()?;
        let offset = self.topic(topic)?.append(partition, key, value, timestamp)?;

        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.appended.notify_all();

        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
            timestamp,
        })
    }

    fn fetch(
        &self,
        positions: &[(TopicPartition, Offset)],
        max_records: usize,
    ) -> Result<Vec<(TopicPartition, Vec<RawRecord>)>, BrokerError> {
        self.check_available()?;
        let mut remaining = max_records;
        let mut batches = Vec::new();
        for (tp, offset) in positions {
            if remaining == 0 {
                break;
            }
            let records = self.topic(&tp.topic)?.read(tp.partition, *offset, remaining)?;
            if !records.is_empty() {
                remaining -= records.len();
                batches.push((tp.clone(), records));
            }
        }
        Ok(batches)
    }

    /// Fetch records at or after each given position.
    ///
    /// Blocks until at least one record is available or `timeout` elapses, in
    /// which case an empty batch is returned. Records of one partition are
    /// returned in offset order.
    pub fn poll(
        &self,
        positions: &[(TopicPartition, Offset)],
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<(TopicPartition, Vec<RawRecord>)>, BrokerError> {
        // A timeout too large for `Instant` waits until something is appended.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let seen = *self.generation.lock();
            let batches = self.fetch(positions, max_records)?;
            if !batches.is_empty() {
                return Ok(batches);
            }

            let mut generation = self.generation.lock();
            while *generation == seen {
                match deadline {
                    Some(deadline) => {
                        if self
                            .appended
                            .wait_until(&mut generation, deadline)
                            .timed_out()
                        {
                            return Ok(Vec::new());
                        }
                    }
                    None => self.appended.wait(&mut generation),
                }
            }
        }
    }

    /// Store committed positions for a consumer group.
    pub fn commit(&self, group: &str, offsets: &[(TopicPartition, Offset)]) {
        let mut committed = self.committed.lock();
        for (tp, offset) in offsets {
            committed.insert((group.to_string(), tp.clone()), *offset);
        }
    }

    pub fn committed(&self, group: &str, tp: &TopicPartition) -> Option<Offset> {
        self.committed
            .lock()
            .get(&(group.to_string(), tp.clone()))
            .copied()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("address", &self.address)
            .field("topics", &self.topic_names())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;

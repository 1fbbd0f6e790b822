//! # Consumer
//!
//! Typed reader over broker topics plus a threaded listener container.
//!
//! A consumer belongs to a group. On subscribe it starts each partition at the
//! group's committed offset, or at the beginning/end of the log according to
//! [`OffsetReset`] when nothing has been committed yet.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broker::Broker;
use crate::codec::Serde;
use crate::error::{Result, StreamsError};
use crate::types::{Offset, Record, TopicPartition};

/// Consecutive decode failures on one record before a listener skips it.
pub const MAX_DECODE_ATTEMPTS: u32 = 3;

/// Where to start reading when the group has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl FromStr for OffsetReset {
    type Err = StreamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(StreamsError::Config(format!(
                "unknown offset reset policy '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffsetReset::Earliest => f.write_str("earliest"),
            OffsetReset::Latest => f.write_str("latest"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub max_poll_records: usize,
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            auto_offset_reset: OffsetReset::default(),
            max_poll_records: 500,
        }
    }

    pub fn with_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }
}

pub struct Consumer<K, V> {
    broker: Arc<Broker>,
    key_serde: Arc<dyn Serde<K>>,
    value_serde: Arc<dyn Serde<V>>,
    config: ConsumerConfig,
    /// Next offset to read, per assigned partition.
    positions: Vec<(TopicPartition, Offset)>,
    /// Record that failed to decode on the last poll.
    undecodable: Option<(TopicPartition, Offset)>,
}

impl<K: 'static, V: 'static> Consumer<K, V> {
    pub fn new(
        broker: Arc<Broker>,
        key_serde: impl Serde<K> + 'static,
        value_serde: impl Serde<V> + 'static,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            key_serde: Arc::new(key_serde),
            value_serde: Arc::new(value_serde),
            config,
            positions: Vec::new(),
            undecodable: None,
        }
    }

    /// Assign every partition of `topic` to this consumer.
    pub fn subscribe(&mut self, topic: &str) -> Result<()> {
        let handle = self.broker.topic(topic)?;
        self.positions.retain(|(tp, _)| tp.topic != topic);
        for partition in 0..handle.partition_count() {
            let tp = TopicPartition::new(topic, partition);
            let start = match self.broker.committed(&self.config.group_id, &tp) {
                Some(offset) => offset,
                None => match self.config.auto_offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => handle.end_offset(partition)?,
                },
            };
            tracing::debug!(group = %self.config.group_id, %tp, start, "assigned partition");
            self.positions.push((tp, start));
        }
        Ok(())
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.positions.iter().map(|(tp, _)| tp.clone()).collect()
    }

    pub fn position(&self, tp: &TopicPartition) -> Option<Offset> {
        self.positions
            .iter()
            .find(|(assigned, _)| assigned == tp)
            .map(|(_, offset)| *offset)
    }

    /// Fetch the next batch, waiting up to `timeout` for data.
    ///
    /// Records of one partition come back in offset order. A record that
    /// fails to decode fails the whole batch and positions are not advanced.
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<Record<K, V>>> {
        if self.positions.is_empty() {
            thread::sleep(timeout);
            return Ok(Vec::new());
        }
        let batches = self
            .broker
            .poll(&self.positions, self.config.max_poll_records, timeout)?;

        self.undecodable = None;
        let mut records = Vec::new();
        let mut advanced = Vec::with_capacity(batches.len());
        for (tp, raws) in batches {
            let mut next = None;
            for raw in raws {
                let decoded = self
                    .key_serde
                    .deserialize(&tp.topic, &raw.key)
                    .and_then(|key| Ok((key, self.value_serde.deserialize(&tp.topic, &raw.value)?)));
                let (key, value) = match decoded {
                    Ok(pair) => pair,
                    Err(e) => {
                        self.undecodable = Some((tp, raw.offset));
                        return Err(e.into());
                    }
                };
                records.push(Record {
                    key,
                    value,
                    timestamp: raw.timestamp,
                    partition: raw.partition,
                    offset: raw.offset,
                });
                next = Some(raw.offset + 1);
            }
            if let Some(next) = next {
                advanced.push((tp, next));
            }
        }

        for (tp, next) in advanced {
            if let Some((_, position)) = self.positions.iter_mut().find(|(p, _)| *p == tp) {
                *position = next;
            }
        }
        Ok(records)
    }

    /// The record that made the last [`poll`](Self::poll) fail, if any.
    pub fn undecodable(&self) -> Option<&(TopicPartition, Offset)> {
        self.undecodable.as_ref()
    }

    /// Move past the record that failed to decode on the last poll.
    pub fn skip_undecodable(&mut self) -> Option<(TopicPartition, Offset)> {
        let (tp, offset) = self.undecodable.take()?;
        if let Some((_, position)) = self.positions.iter_mut().find(|(p, _)| *p == tp) {
            *position = offset + 1;
        }
        Some((tp, offset))
    }

    /// Store the current positions as the group's committed offsets.
    pub fn commit(&self) {
        self.broker.commit(&self.config.group_id, &self.positions);
    }
}

/// Runs a consumer on its own thread and hands every record to a callback.
///
/// Offsets are committed after each polled batch has been handed over, so a
/// record may be delivered again after a crash. A record that still fails to
/// decode after [`MAX_DECODE_ATTEMPTS`] polls is logged, counted and skipped.
pub struct ListenerContainer {
    name: String,
    shutdown: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ListenerContainer {
    pub fn start<K, V, F>(
        name: impl Into<String>,
        mut consumer: Consumer<K, V>,
        poll_timeout: Duration,
        mut on_record: F,
    ) -> Result<Self>
    where
        K: Send + 'static,
        V: Send + 'static,
        F: FnMut(Record<K, V>) + Send + 'static,
    {
        let name = name.into();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let skipped = Arc::new(AtomicU64::new(0));
        let skip_count = Arc::clone(&skipped);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut failing: Option<(TopicPartition, Offset)> = None;
                let mut attempts = 0u32;
                while !flag.load(Ordering::SeqCst) {
                    match consumer.poll(poll_timeout) {
                        Ok(records) => {
                            failing = None;
                            attempts = 0;
                            if records.is_empty() {
                                continue;
                            }
                            for record in records {
                                on_record(record);
                            }
                            consumer.commit();
                        }
                        Err(e) => {
                            let current = consumer.undecodable().cloned();
                            if current.is_some() && current == failing {
                                attempts += 1;
                            } else {
                                failing = current;
                                attempts = 1;
                            }
                            if failing.is_some() && attempts >= MAX_DECODE_ATTEMPTS {
                                if let Some((tp, offset)) = consumer.skip_undecodable() {
                                    tracing::error!(%tp, offset, error = %e, "skipping undecodable record");
                                    skip_count.fetch_add(1, Ordering::Relaxed);
                                    consumer.commit();
                                }
                                failing = None;
                                attempts = 0;
                                continue;
                            }
                            tracing::warn!(error = %e, attempts, "listener poll failed");
                            thread::sleep(poll_timeout);
                        }
                    }
                }
                consumer.commit();
            })
            .map_err(|e| StreamsError::Thread(format!("spawn listener {name}: {e}")))?;

        tracing::info!(listener = %name, "listener container started");
        Ok(Self {
            name,
            shutdown,
            skipped,
            handle: Some(handle),
        })
    }

    /// Records skipped because they could not be decoded.
    pub fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the listener thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(listener = %self.name, "listener callback panicked");
            }
            tracing::info!(listener = %self.name, "listener container stopped");
        }
    }
}

impl Drop for ListenerContainer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/consumer_tests.rs"]
mod tests;

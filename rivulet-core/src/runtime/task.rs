//! Task planning and per-partition processing.
//!
//! [`TaskPlan`] is the topology resolved against a configuration and a broker:
//! topic names are final, serdes are picked, and every sub-topology knows its
//! source partitions. It is built once per `start()` and shared by all threads.
//!
//! A [`StreamTask`] runs one sub-topology for one source partition and owns
//! the window stores of that sub-topology.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;

use crate::broker::Broker;
use crate::codec::ErasedSerde;
use crate::config::StreamsConfig;
use crate::consumer::OffsetReset;
use crate::error::{Result, StreamsError};
use crate::partitioner::{DefaultPartitioner, Partitioner};
use crate::producer::append_with_retry;
use crate::state::WindowStore;
use crate::time::TimestampExtractor;
use crate::topology::{
    Message, NodeId, NodeKind, ReduceFn, TopicRef, Topology, TransformFn, WindowedKeyFn,
};
use crate::types::{EventTime, Offset, RawRecord, TopicPartition};
use crate::window::TimeWindows;

use super::RuntimeMetrics;

enum Stage {
    Source {
        topic: String,
        key: ErasedSerde,
        value: ErasedSerde,
    },
    Transform {
        func: TransformFn,
    },
    Sink {
        topic: String,
        key: ErasedSerde,
        value: ErasedSerde,
        partitioner: Arc<dyn Partitioner>,
    },
    WindowedReduce {
        store: String,
        windows: TimeWindows,
        key: ErasedSerde,
        reducer: ReduceFn,
        windowed_key: WindowedKeyFn,
    },
}

struct PlanNode {
    name: String,
    stage: Stage,
    children: Vec<NodeId>,
}

/// A topology bound to concrete topics and serdes.
pub(super) struct TaskPlan {
    nodes: Vec<PlanNode>,
    /// (resolved topic, source node) per sub-topology.
    sources: Vec<(String, NodeId)>,
    internal_topics: Vec<String>,
    internal_partitions: u32,
}

impl std::fmt::Debug for TaskPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPlan")
            .field("sources", &self.sources)
            .field("internal_topics", &self.internal_topics)
            .field("internal_partitions", &self.internal_partitions)
            .finish_non_exhaustive()
    }
}

impl TaskPlan {
    pub(super) fn resolve(
        topology: &Topology,
        config: &StreamsConfig,
        broker: &Broker,
    ) -> Result<Self> {
        topology.validate()?;
        let app_id = config.application_id.as_str();

        let mut nodes = Vec::with_capacity(topology.nodes().len());
        let mut sources = Vec::new();
        let mut internal_partitions = 0;
        for node in topology.nodes() {
            let stage = match &node.kind {
                NodeKind::Source { topic, key, value } => {
                    let name = topic.resolve(app_id);
                    if !topic.is_internal() {
                        let partitions = broker
                            .topic(&name)
                            .map_err(|_| {
                                StreamsError::Config(format!("source topic {name} does not exist"))
                            })?
                            .partition_count();
                        internal_partitions = internal_partitions.max(partitions);
                    }
                    sources.push((name.clone(), node.id));
                    Stage::Source {
                        topic: name,
                        key: key.resolve(config.default_key_serde)?,
                        value: value.resolve(config.default_value_serde)?,
                    }
                }
                NodeKind::Transform { func } => Stage::Transform {
                    func: Arc::clone(func),
                },
                NodeKind::Sink {
                    topic,
                    key,
                    value,
                    partitioner,
                } => {
                    let name = topic.resolve(app_id);
                    if !topic.is_internal() && broker.topic(&name).is_err() {
                        return Err(StreamsError::Config(format!(
                            "sink topic {name} does not exist"
                        )));
                    }
                    Stage::Sink {
                        topic: name,
                        key: key.resolve(config.default_key_serde)?,
                        value: value.resolve(config.default_value_serde)?,
                        partitioner: partitioner
                            .clone()
                            .unwrap_or_else(|| Arc::new(DefaultPartitioner)),
                    }
                }
                NodeKind::WindowedReduce {
                    store,
                    windows,
                    key,
                    reducer,
                    windowed_key,
                } => Stage::WindowedReduce {
                    store: store.clone(),
                    windows: *windows,
                    key: key.resolve(config.default_key_serde)?,
                    reducer: Arc::clone(reducer),
                    windowed_key: Arc::clone(windowed_key),
                },
            };
            nodes.push(PlanNode {
                name: node.name.clone(),
                stage,
                children: topology.children(node.id),
            });
        }

        let internal_topics = topology
            .internal_topics()
            .into_iter()
            .map(|name| TopicRef::Internal(name).resolve(app_id))
            .collect();

        Ok(Self {
            nodes,
            sources,
            internal_topics,
            internal_partitions: internal_partitions.max(1),
        })
    }

    pub(super) fn internal_topics(&self) -> &[String] {
        &self.internal_topics
    }

    /// Partition count for internal topics: that of the widest source topic.
    pub(super) fn internal_partitions(&self) -> u32 {
        self.internal_partitions
    }

    /// One task per source topic-partition, positioned at the committed
    /// offset or according to the reset policy.
    pub(super) fn create_tasks(
        self: &Arc<Self>,
        config: &StreamsConfig,
        broker: &Arc<Broker>,
        metrics: &Arc<RuntimeMetrics>,
    ) -> Result<Vec<StreamTask>> {
        let extractor: Arc<dyn TimestampExtractor> = Arc::from(config.timestamp_extractor.extractor());
        let mut tasks = Vec::new();
        for (topic, source) in &self.sources {
            let handle = broker.topic(topic)?;
            for partition in 0..handle.partition_count() {
                let id = TopicPartition::new(topic.as_str(), partition);
                let position = match broker.committed(&config.application_id, &id) {
                    Some(offset) => offset,
                    None => match config.auto_offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => handle.end_offset(partition)?,
                    },
                };
                tasks.push(StreamTask::new(
                    id,
                    Arc::clone(self),
                    *source,
                    position,
                    Arc::clone(&extractor),
                    TaskContext {
                        broker: Arc::clone(broker),
                        metrics: Arc::clone(metrics),
                        retries: config.producer_retries,
                        retry_backoff: config.retry_backoff,
                    },
                ));
            }
        }
        Ok(tasks)
    }
}

pub(super) struct TaskContext {
    broker: Arc<Broker>,
    metrics: Arc<RuntimeMetrics>,
    retries: u32,
    retry_backoff: Duration,
}

pub(super) struct StreamTask {
    id: TopicPartition,
    plan: Arc<TaskPlan>,
    source: NodeId,
    stores: HashMap<NodeId, WindowStore>,
    extractor: Arc<dyn TimestampExtractor>,
    partition_time: EventTime,
    position: Offset,
    committed: Option<Offset>,
    ctx: TaskContext,
}

impl StreamTask {
    fn new(
        id: TopicPartition,
        plan: Arc<TaskPlan>,
        source: NodeId,
        position: Offset,
        extractor: Arc<dyn TimestampExtractor>,
        ctx: TaskContext,
    ) -> Self {
        let mut task = Self {
            id,
            plan,
            source,
            stores: HashMap::new(),
            extractor,
            partition_time: -1,
            position,
            committed: None,
            ctx,
        };
        task.init_stores(source);
        task
    }

    /// Create an empty store for every windowed reduce reachable from `node`.
    fn init_stores(&mut self, node: NodeId) {
        let plan = Arc::clone(&self.plan);
        let Some(plan_node) = plan.nodes.get(node) else {
            return;
        };
        if let Stage::WindowedReduce { store, windows, .. } = &plan_node.stage {
            self.stores
                .insert(node, WindowStore::new(store.clone(), windows.retention_ms()));
        }
        for child in &plan_node.children {
            self.init_stores(*child);
        }
    }

    pub(super) fn id(&self) -> &TopicPartition {
        &self.id
    }

    /// Offset of the next record to process.
    pub(super) fn position(&self) -> Offset {
        self.position
    }

    /// Offsets to commit, if any progress was made since the last commit.
    pub(super) fn pending_commit(&self) -> Option<(TopicPartition, Offset)> {
        (self.committed != Some(self.position)).then(|| (self.id.clone(), self.position))
    }

    pub(super) fn mark_committed(&mut self, offset: Offset) {
        self.committed = Some(offset);
    }

    /// Run one record through the sub-topology and advance the position.
    pub(super) fn process(&mut self, record: &RawRecord) -> Result<()> {
        let timestamp = self.extractor.extract(record, self.partition_time);
        self.partition_time = self.partition_time.max(timestamp);

        let plan = Arc::clone(&self.plan);
        let source = self.source;
        let Some(PlanNode {
            stage: Stage::Source { topic, key, value },
            children,
            ..
        }) = plan.nodes.get(source)
        else {
            return Err(StreamsError::IllegalState(format!(
                "task {} has no source node",
                self.id
            )));
        };

        let message = Message::new(
            key.deserialize(topic, &record.key)?,
            value.deserialize(topic, &record.value)?,
            timestamp,
        );
        self.forward(&plan, children, message)?;

        self.position = record.offset + 1;
        self.ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn forward(&mut self, plan: &TaskPlan, children: &[NodeId], message: Message) -> Result<()> {
        if let Some((last, rest)) = children.split_last() {
            for child in rest {
                self.process_node(plan, *child, message.clone())?;
            }
            self.process_node(plan, *last, message)?;
        }
        Ok(())
    }

    fn process_node(&mut self, plan: &TaskPlan, id: NodeId, message: Message) -> Result<()> {
        let Some(node) = plan.nodes.get(id) else {
            return Err(StreamsError::IllegalState(format!("unknown node {id}")));
        };
        match &node.stage {
            Stage::Source { .. } => Err(StreamsError::IllegalState(format!(
                "source {} cannot receive forwarded records",
                node.name
            ))),
            Stage::Transform { func } => match func(message)? {
                Some(out) => self.forward(plan, &node.children, out),
                None => Ok(()),
            },
            Stage::Sink {
                topic,
                key,
                value,
                partitioner,
            } => self.write(topic, key, value, partitioner.as_ref(), message),
            Stage::WindowedReduce {
                windows,
                key,
                reducer,
                windowed_key,
                ..
            } => {
                let updates = self.reduce(id, windows, key, reducer, windowed_key, message)?;
                for update in updates {
                    self.forward(plan, &node.children, update)?;
                }
                Ok(())
            }
        }
    }

    fn write(
        &self,
        topic: &str,
        key_serde: &ErasedSerde,
        value_serde: &ErasedSerde,
        partitioner: &dyn Partitioner,
        message: Message,
    ) -> Result<()> {
        let key = key_serde.serialize(topic, &message.key)?;
        let value = value_serde.serialize(topic, &message.value)?;
        let partitions = self.ctx.broker.topic(topic)?.partition_count();
        let partition = partitioner.partition(topic, &key, partitions);
        append_with_retry(
            &self.ctx.broker,
            topic,
            partition,
            key,
            value,
            message.timestamp,
            self.ctx.retries,
            self.ctx.retry_backoff,
        )?;
        Ok(())
    }

    /// Fold `message` into every window covering its timestamp and return the
    /// updated `(Windowed<K>, accumulator)` pairs, oldest window first.
    fn reduce(
        &mut self,
        id: NodeId,
        windows: &TimeWindows,
        key_serde: &ErasedSerde,
        reducer: &ReduceFn,
        windowed_key: &WindowedKeyFn,
        message: Message,
    ) -> Result<Vec<Message>> {
        let task = self.id.clone();
        let Some(store) = self.stores.get_mut(&id) else {
            return Err(StreamsError::IllegalState(format!(
                "task {task} has no store for node {id}"
            )));
        };
        let key_bytes: Bytes = key_serde.serialize(store.name(), &message.key)?;
        store.observe(message.timestamp);

        let mut updates = Vec::new();
        for window in windows.windows_for(message.timestamp) {
            if store.is_expired(&window) {
                store.record_late();
                self.ctx.metrics.dropped_late.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %task,
                    store = store.name(),
                    %window,
                    timestamp = message.timestamp,
                    stream_time = store.stream_time(),
                    "dropping record for expired window"
                );
                continue;
            }
            let aggregate = match store.get(&key_bytes, &window) {
                Some(entry) => reducer(&entry.value, &message.value)?,
                None => message.value.clone(),
            };
            store.put(
                key_bytes.clone(),
                message.key.clone(),
                window,
                aggregate.clone(),
            );
            updates.push(Message::new(
                windowed_key(&message.key, window)?,
                aggregate,
                message.timestamp,
            ));
        }
        Ok(updates)
    }

    #[cfg(test)]
    pub(super) fn store(&self, name: &str) -> Option<&WindowStore> {
        self.stores.values().find(|s| s.name() == name)
    }
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;

//! # Topology
//!
//! The logical processor graph a runtime executes.
//!
//! ```text
//! Source(topic) ──▶ Transform ──▶ Sink(repartition topic)
//!
//! Source(repartition topic) ──▶ WindowedReduce(store) ──▶ Transform ──▶ Sink(topic)
//! ```
//!
//! Nodes are connected by parent → child edges. Every source starts a
//! sub-topology: the nodes reachable from it without crossing a topic. A
//! message forwarded to several children is cloned for each one.
//!
//! Keys and values travel as [`BoxedValue`]; the typed DSL wraps user closures
//! so that every node here is type-erased.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::codec::SerdeSlot;
use crate::error::{Result, StreamsError};
use crate::partitioner::Partitioner;
use crate::types::{BoxedValue, EventTime};
use crate::window::{TimeWindow, TimeWindows};

pub type NodeId = usize;

/// A record in flight between the processors of one task.
#[derive(Debug, Clone)]
pub struct Message {
    pub key: BoxedValue,
    pub value: BoxedValue,
    pub timestamp: EventTime,
}

impl Message {
    pub fn new(key: BoxedValue, value: BoxedValue, timestamp: EventTime) -> Self {
        Self {
            key,
            value,
            timestamp,
        }
    }
}

/// Per-record stage. `Ok(None)` drops the message.
pub type TransformFn = Arc<dyn Fn(Message) -> Result<Option<Message>> + Send + Sync>;

/// Folds a new value into the accumulator of a window.
pub type ReduceFn = Arc<dyn Fn(&BoxedValue, &BoxedValue) -> Result<BoxedValue> + Send + Sync>;

/// Builds the downstream key (a `Windowed<K>`) from a grouping key and its window.
pub type WindowedKeyFn = Arc<dyn Fn(&BoxedValue, TimeWindow) -> Result<BoxedValue> + Send + Sync>;

/// A topic referenced by a source or sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicRef {
    /// A user topic that must exist before the runtime starts.
    External(String),
    /// A topic owned by the application; created at start as `{application.id}-{name}`.
    Internal(String),
}

impl TopicRef {
    pub fn resolve(&self, application_id: &str) -> String {
        match self {
            TopicRef::External(name) => name.clone(),
            TopicRef::Internal(name) => format!("{application_id}-{name}"),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, TopicRef::Internal(_))
    }
}

impl std::fmt::Display for TopicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicRef::External(name) => f.write_str(name),
            TopicRef::Internal(name) => write!(f, "<app>-{name}"),
        }
    }
}

pub enum NodeKind {
    Source {
        topic: TopicRef,
        key: SerdeSlot,
        value: SerdeSlot,
    },
    Transform {
        func: TransformFn,
    },
    Sink {
        topic: TopicRef,
        key: SerdeSlot,
        value: SerdeSlot,
        partitioner: Option<Arc<dyn Partitioner>>,
    },
    WindowedReduce {
        store: String,
        windows: TimeWindows,
        /// Serde for the grouping key; its bytes identify the key in the store.
        key: SerdeSlot,
        reducer: ReduceFn,
        windowed_key: WindowedKeyFn,
    },
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Source { topic, .. } => f.debug_struct("Source").field("topic", topic).finish(),
            NodeKind::Transform { .. } => f.write_str("Transform"),
            NodeKind::Sink { topic, .. } => f.debug_struct("Sink").field("topic", topic).finish(),
            NodeKind::WindowedReduce { store, windows, .. } => f
                .debug_struct("WindowedReduce")
                .field("store", store)
                .field("windows", windows)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct ProcessorNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

/// The processor graph built by the DSL.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: Vec<ProcessorNode>,
    edges: Vec<(NodeId, NodeId)>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, prefix: &str, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ProcessorNode {
            id,
            name: format!("{prefix}-{id:010}"),
            kind,
        });
        id
    }

    pub fn add_source(&mut self, topic: TopicRef, key: SerdeSlot, value: SerdeSlot) -> NodeId {
        self.add_node("KSTREAM-SOURCE", NodeKind::Source { topic, key, value })
    }

    /// Add a per-record stage under `parent`. `prefix` names the operation,
    /// e.g. `KSTREAM-MAPVALUES`.
    pub fn add_transform(&mut self, prefix: &str, parent: NodeId, func: TransformFn) -> NodeId {
        let id = self.add_node(prefix, NodeKind::Transform { func });
        self.add_edge(parent, id);
        id
    }

    pub fn add_sink(
        &mut self,
        parent: NodeId,
        topic: TopicRef,
        key: SerdeSlot,
        value: SerdeSlot,
        partitioner: Option<Arc<dyn Partitioner>>,
    ) -> NodeId {
        let id = self.add_node(
            "KSTREAM-SINK",
            NodeKind::Sink {
                topic,
                key,
                value,
                partitioner,
            },
        );
        self.add_edge(parent, id);
        id
    }

    pub fn add_windowed_reduce(
        &mut self,
        parent: NodeId,
        store: impl Into<String>,
        windows: TimeWindows,
        key: SerdeSlot,
        reducer: ReduceFn,
        windowed_key: WindowedKeyFn,
    ) -> NodeId {
        let id = self.add_node(
            "KSTREAM-REDUCE",
            NodeKind::WindowedReduce {
                store: store.into(),
                windows,
                key,
                reducer,
                windowed_key,
            },
        );
        self.add_edge(parent, id);
        id
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        self.edges.push((parent, child));
    }

    pub fn node(&self, id: NodeId) -> Option<&ProcessorNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[ProcessorNode] {
        &self.nodes
    }

    /// Children of `id`, in the order they were attached.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(parent, _)| *parent == id)
            .map(|(_, child)| *child)
            .collect()
    }

    fn has_parent(&self, id: NodeId) -> bool {
        self.edges.iter().any(|(_, child)| *child == id)
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Source { .. }))
            .map(|n| n.id)
            .collect()
    }

    /// Internal topics the runtime has to create, by unprefixed name.
    pub fn internal_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Source {
                    topic: TopicRef::Internal(name),
                    ..
                }
                | NodeKind::Sink {
                    topic: TopicRef::Internal(name),
                    ..
                } => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Structural checks that do not need a broker or configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sources().is_empty() {
            return Err(StreamsError::Config(
                "topology has no source".to_string(),
            ));
        }

        let mut stores = HashSet::new();
        let mut source_topics = HashSet::new();
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Source { topic, .. } => {
                    if self.has_parent(node.id) {
                        return Err(StreamsError::Config(format!(
                            "source {} cannot have a parent",
                            node.name
                        )));
                    }
                    if !source_topics.insert(topic.clone()) {
                        return Err(StreamsError::Config(format!(
                            "topic {topic} is consumed by more than one source"
                        )));
                    }
                }
                other => {
                    if !self.has_parent(node.id) {
                        return Err(StreamsError::Config(format!(
                            "{} is not connected to a source",
                            node.name
                        )));
                    }
                    if let NodeKind::WindowedReduce { store, windows, .. } = other {
                        windows.validate()?;
                        if !stores.insert(store.clone()) {
                            return Err(StreamsError::Config(format!(
                                "store name {store} is used twice"
                            )));
                        }
                    }
                }
            }
        }

        for name in self.internal_topics() {
            let topic = TopicRef::Internal(name);
            if !source_topics.contains(&topic) {
                return Err(StreamsError::Config(format!(
                    "internal topic {topic} is written but never read"
                )));
            }
        }
        Ok(())
    }

    /// Human-readable rendering of the graph, one sub-topology per source.
    pub fn describe(&self) -> String {
        let mut out = String::from("Topology\n");
        for (index, source) in self.sources().into_iter().enumerate() {
            let _ = writeln!(out, "  Sub-topology {index}");
            self.describe_node(source, 2, &mut out);
        }
        out
    }

    fn describe_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let _ = match &node.kind {
            NodeKind::Source { topic, .. } => {
                writeln!(out, "{indent}Source: {} (topic: {topic})", node.name)
            }
            NodeKind::Transform { .. } => writeln!(out, "{indent}Processor: {}", node.name),
            NodeKind::Sink { topic, .. } => {
                writeln!(out, "{indent}Sink: {} (topic: {topic})", node.name)
            }
            NodeKind::WindowedReduce { store, windows, .. } => writeln!(
                out,
                "{indent}Processor: {} (store: {store}, window: {} ms)",
                node.name,
                windows.size_ms()
            ),
        };
        for child in self.children(id) {
            self.describe_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
#[path = "tests/topology_tests.rs"]
mod tests;

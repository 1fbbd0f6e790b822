use std::any::{Any, type_name};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StreamsError;

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Position of a record inside its partition.
pub type Offset = u64;

/// Index of a partition inside its topic.
pub type PartitionId = u32;

/// A single partition of a named topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record as stored in a topic: serialized key and value plus position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: EventTime,
    pub partition: PartitionId,
    pub offset: Offset,
}

/// A decoded record handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<K, V> {
    pub key: K,
    pub value: V,
    pub timestamp: EventTime,
    pub partition: PartitionId,
    pub offset: Offset,
}

/// Acknowledgement returned once a record has been appended to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: EventTime,
}

/// Trait bound for keys and values that flow through a topology.
pub trait StreamData: Send + Clone + 'static {}

impl<T> StreamData for T where T: Send + Clone + 'static {}

// --- Type-erased cloneable value for the runtime ---

/// Trait object that supports Any + Clone.
pub trait CloneableAny: Any + Send {
    fn clone_box(&self) -> Box<dyn CloneableAny>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Clone + Send + 'static> CloneableAny for T {
    fn clone_box(&self) -> Box<dyn CloneableAny> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A cloneable, type-erased value. Keys and values travel between processors
/// of a task in this form; the typed DSL downcasts at each stage.
pub struct BoxedValue {
    inner: Box<dyn CloneableAny>,
    type_name: &'static str,
}

impl BoxedValue {
    /// Wrap a concrete value into a type-erased box.
    pub fn new<T: StreamData>(val: T) -> Self {
        Self {
            inner: Box::new(val),
            type_name: type_name::<T>(),
        }
    }

    /// Name of the wrapped type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Try to get a reference to the inner value as type `T`. Returns `None` on mismatch.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref()
    }

    /// Like [`downcast_ref`](Self::downcast_ref) but reports a mismatch as an error.
    pub fn get<T: 'static>(&self) -> Result<&T, StreamsError> {
        self.downcast_ref().ok_or(StreamsError::TypeMismatch {
            expected: type_name::<T>(),
            found: self.type_name,
        })
    }

    /// Unwrap the inner value.
    pub fn downcast<T: 'static>(self) -> Result<T, StreamsError> {
        let found = self.type_name;
        self.inner
            .into_any()
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| StreamsError::TypeMismatch {
                expected: type_name::<T>(),
                found,
            })
    }
}

impl Clone for BoxedValue {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
            type_name: self.type_name,
        }
    }
}

impl std::fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxedValue(<{}>)", self.type_name)
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;

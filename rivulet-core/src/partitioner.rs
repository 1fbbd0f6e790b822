//! # Partitioner
//!
//! Routes serialized keys to topic partitions. Producers and sink stages share
//! the same default so a key written by either lands in the same partition.

use std::hash::{Hash, Hasher};

use ahash::AHasher;

use crate::types::PartitionId;

/// Trait for choosing the partition of a record.
pub trait Partitioner: Send + Sync {
    /// Determine which partition (0..num_partitions) this key should go to.
    fn partition(&self, topic: &str, key: &[u8], num_partitions: u32) -> PartitionId;
}

/// Hash-based partitioner: `hash(key bytes) mod num_partitions`.
///
/// Uses ahash with fixed keys so the mapping is stable for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitioner;

impl Partitioner for DefaultPartitioner {
    fn partition(&self, _topic: &str, key: &[u8], num_partitions: u32) -> PartitionId {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(num_partitions.max(1))) as PartitionId
    }
}

impl<F> Partitioner for F
where
    F: Fn(&str, &[u8], u32) -> PartitionId + Send + Sync,
{
    fn partition(&self, topic: &str, key: &[u8], num_partitions: u32) -> PartitionId {
        self(topic, key, num_partitions)
    }
}

#[cfg(test)]
#[path = "tests/partitioner_tests.rs"]
mod tests;

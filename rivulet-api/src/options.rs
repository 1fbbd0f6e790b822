//! Serde and partitioning options for sources, sinks and repartitions.
//!
//! Each option records the Rust types it applies to. Anything left unset
//! falls back to `default.key.serde` / `default.value.serde`, which the
//! runtime checks against those types when it starts.

use std::marker::PhantomData;
use std::sync::Arc;

use rivulet_core::codec::{Serde, SerdeSlot};
use rivulet_core::partitioner::Partitioner;
use rivulet_core::types::StreamData;

/// How a source topic is read.
pub struct Consumed<K, V> {
    pub(crate) key: SerdeSlot,
    pub(crate) value: SerdeSlot,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K: StreamData, V: StreamData> Consumed<K, V> {
    pub fn with<SK, SV>(key: SK, value: SV) -> Self
    where
        SK: Serde<K> + 'static,
        SV: Serde<V> + 'static,
    {
        Self {
            key: SerdeSlot::explicit::<K, _>(key),
            value: SerdeSlot::explicit::<V, _>(value),
            _phantom: PhantomData,
        }
    }

    pub fn with_key_serde<SK: Serde<K> + 'static>(mut self, key: SK) -> Self {
        self.key = SerdeSlot::explicit::<K, _>(key);
        self
    }

    pub fn with_value_serde<SV: Serde<V> + 'static>(mut self, value: SV) -> Self {
        self.value = SerdeSlot::explicit::<V, _>(value);
        self
    }
}

impl<K: StreamData, V: StreamData> Default for Consumed<K, V> {
    fn default() -> Self {
        Self {
            key: SerdeSlot::default_for::<K>(),
            value: SerdeSlot::default_for::<V>(),
            _phantom: PhantomData,
        }
    }
}

/// How records are written to a topic.
pub struct Produced<K, V> {
    pub(crate) key: SerdeSlot,
    pub(crate) value: SerdeSlot,
    pub(crate) partitioner: Option<Arc<dyn Partitioner>>,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K: StreamData, V: StreamData> Produced<K, V> {
    pub fn with<SK, SV>(key: SK, value: SV) -> Self
    where
        SK: Serde<K> + 'static,
        SV: Serde<V> + 'static,
    {
        Self {
            key: SerdeSlot::explicit::<K, _>(key),
            value: SerdeSlot::explicit::<V, _>(value),
            partitioner: None,
            _phantom: PhantomData,
        }
    }

    pub fn with_key_serde<SK: Serde<K> + 'static>(mut self, key: SK) -> Self {
        self.key = SerdeSlot::explicit::<K, _>(key);
        self
    }

    pub fn with_value_serde<SV: Serde<V> + 'static>(mut self, value: SV) -> Self {
        self.value = SerdeSlot::explicit::<V, _>(value);
        self
    }

    /// Route records with `partitioner` instead of the key hash.
    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    /// The matching read side, used when a written topic is consumed again.
    pub(crate) fn consumed(&self) -> Consumed<K, V> {
        Consumed {
            key: self.key.clone(),
            value: self.value.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<K: StreamData, V: StreamData> Default for Produced<K, V> {
    fn default() -> Self {
        Self {
            key: SerdeSlot::default_for::<K>(),
            value: SerdeSlot::default_for::<V>(),
            partitioner: None,
            _phantom: PhantomData,
        }
    }
}

/// Serdes for grouping: used by the repartition topic and the window store key.
pub struct Grouped<K, V> {
    pub(crate) key: SerdeSlot,
    pub(crate) value: SerdeSlot,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K: StreamData, V: StreamData> Grouped<K, V> {
    pub fn with<SK, SV>(key: SK, value: SV) -> Self
    where
        SK: Serde<K> + 'static,
        SV: Serde<V> + 'static,
    {
        Self {
            key: SerdeSlot::explicit::<K, _>(key),
            value: SerdeSlot::explicit::<V, _>(value),
            _phantom: PhantomData,
        }
    }
}

impl<K: StreamData, V: StreamData> Default for Grouped<K, V> {
    fn default() -> Self {
        Self {
            key: SerdeSlot::default_for::<K>(),
            value: SerdeSlot::default_for::<V>(),
            _phantom: PhantomData,
        }
    }
}

impl<K, V> Clone for Grouped<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            _phantom: PhantomData,
        }
    }
}

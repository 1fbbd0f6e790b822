use std::cell::RefCell;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use rivulet_core::Result;
use rivulet_core::topology::{Message, NodeId, TopicRef, Topology, TransformFn};
use rivulet_core::types::{BoxedValue, StreamData};

use crate::grouped::KGroupedStream;
use crate::options::{Grouped, Produced};

/// A record stream of `K` keys and `V` values.
///
/// Every operation appends a processor to the shared topology and returns a
/// new stream handle, so one stream may feed several branches.
pub struct KStream<K, V> {
    topology: Rc<RefCell<Topology>>,
    node: NodeId,
    /// Set once the key may have changed since the last topic boundary.
    repartition_required: bool,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KStream<K, V>
where
    K: StreamData,
    V: StreamData,
{
    pub(crate) fn new(topology: Rc<RefCell<Topology>>, node: NodeId, repartition_required: bool) -> Self {
        Self {
            topology,
            node,
            repartition_required,
            _phantom: PhantomData,
        }
    }

    /// Id of the processor this stream reads from.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    fn transform<K2, V2>(&self, prefix: &str, key_changing: bool, func: TransformFn) -> KStream<K2, V2>
    where
        K2: StreamData,
        V2: StreamData,
    {
        let node = self.topology.borrow_mut().add_transform(prefix, self.node, func);
        KStream::new(
            Rc::clone(&self.topology),
            node,
            self.repartition_required || key_changing,
        )
    }

    pub fn map_values<V2, F>(&self, mapper: F) -> KStream<K, V2>
    where
        V2: StreamData,
        F: Fn(V) -> V2 + Send + Sync + 'static,
    {
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            let value = mapper(msg.value.downcast::<V>()?);
            Ok(Some(Message::new(msg.key, BoxedValue::new(value), msg.timestamp)))
        });
        self.transform("KSTREAM-MAPVALUES", false, func)
    }

    /// Replace key and value. A later grouping repartitions on the new key.
    pub fn map<K2, V2, F>(&self, mapper: F) -> KStream<K2, V2>
    where
        K2: StreamData,
        V2: StreamData,
        F: Fn(K, V) -> (K2, V2) + Send + Sync + 'static,
    {
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            let (key, value) = mapper(msg.key.downcast::<K>()?, msg.value.downcast::<V>()?);
            Ok(Some(Message::new(
                BoxedValue::new(key),
                BoxedValue::new(value),
                msg.timestamp,
            )))
        });
        self.transform("KSTREAM-MAP", true, func)
    }

    pub fn select_key<K2, F>(&self, selector: F) -> KStream<K2, V>
    where
        K2: StreamData,
        F: Fn(&K, &V) -> K2 + Send + Sync + 'static,
    {
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            let key = selector(msg.key.get::<K>()?, msg.value.get::<V>()?);
            Ok(Some(Message::new(BoxedValue::new(key), msg.value, msg.timestamp)))
        });
        self.transform("KSTREAM-KEY-SELECT", true, func)
    }

    /// Keep records for which `predicate` holds.
    pub fn filter<F>(&self, predicate: F) -> KStream<K, V>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            let keep = predicate(msg.key.get::<K>()?, msg.value.get::<V>()?);
            Ok(keep.then_some(msg))
        });
        self.transform("KSTREAM-FILTER", false, func)
    }

    /// Drop records for which `predicate` holds.
    pub fn filter_not<F>(&self, predicate: F) -> KStream<K, V>
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        self.filter(move |key: &K, value: &V| !predicate(key, value))
    }

    /// Observe each record without changing it.
    pub fn peek<F>(&self, action: F) -> KStream<K, V>
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            action(msg.key.get::<K>()?, msg.value.get::<V>()?);
            Ok(Some(msg))
        });
        self.transform("KSTREAM-PEEK", false, func)
    }

    /// Log every record at `info` under `label`.
    pub fn print(&self, label: &str) -> KStream<K, V>
    where
        K: Debug,
        V: Debug,
    {
        let label = label.to_string();
        let func: TransformFn = Arc::new(move |msg: Message| -> Result<Option<Message>> {
            let key = msg.key.get::<K>()?;
            let value = msg.value.get::<V>()?;
            tracing::info!(
                label = %label,
                ?key,
                ?value,
                timestamp = msg.timestamp,
                "record"
            );
            Ok(Some(msg))
        });
        self.transform("KSTREAM-PRINTER", false, func)
    }

    /// Write to `topic` and continue from a fresh read of it.
    ///
    /// The topic must exist; records are shuffled by key across its partitions.
    pub fn through(&self, topic: &str, produced: Produced<K, V>) -> KStream<K, V> {
        let consumed = produced.consumed();
        let mut topology = self.topology.borrow_mut();
        topology.add_sink(
            self.node,
            TopicRef::External(topic.to_string()),
            produced.key,
            produced.value,
            produced.partitioner,
        );
        let source = topology.add_source(
            TopicRef::External(topic.to_string()),
            consumed.key,
            consumed.value,
        );
        drop(topology);
        KStream::new(Rc::clone(&self.topology), source, false)
    }

    /// Write to `topic` with the default serdes.
    pub fn to(&self, topic: &str) {
        self.to_with(topic, Produced::default());
    }

    pub fn to_with(&self, topic: &str, produced: Produced<K, V>) {
        self.topology.borrow_mut().add_sink(
            self.node,
            TopicRef::External(topic.to_string()),
            produced.key,
            produced.value,
            produced.partitioner,
        );
    }

    /// Group by the current key with the default serdes.
    pub fn group_by_key(&self) -> KGroupedStream<K, V> {
        self.group_by_key_with(Grouped::default())
    }

    pub fn group_by_key_with(&self, grouped: Grouped<K, V>) -> KGroupedStream<K, V> {
        KGroupedStream::new(
            Rc::clone(&self.topology),
            self.node,
            self.repartition_required,
            grouped,
        )
    }

    /// Group by a key derived from each record. Always repartitions.
    pub fn group_by<K2, F>(&self, selector: F) -> KGroupedStream<K2, V>
    where
        K2: StreamData,
        F: Fn(&K, &V) -> K2 + Send + Sync + 'static,
    {
        self.group_by_with(selector, Grouped::default())
    }

    pub fn group_by_with<K2, F>(&self, selector: F, grouped: Grouped<K2, V>) -> KGroupedStream<K2, V>
    where
        K2: StreamData,
        F: Fn(&K, &V) -> K2 + Send + Sync + 'static,
    {
        self.select_key(selector).group_by_key_with(grouped)
    }
}

impl<K, V> Clone for KStream<K, V> {
    fn clone(&self) -> Self {
        Self {
            topology: Rc::clone(&self.topology),
            node: self.node,
            repartition_required: self.repartition_required,
            _phantom: PhantomData,
        }
    }
}

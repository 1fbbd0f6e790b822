//! Grouped and windowed streams, and the tables they aggregate into.
//!
//! ```text
//! KStream ──group_by_key──▶ KGroupedStream ──windowed_by──▶ TimeWindowedKStream
//!                                                                  │ reduce
//!                                                                  ▼
//!                                       KStream ◀──to_stream── KTable<Windowed<K>, V>
//! ```
//!
//! If the key changed upstream (`map`, `select_key`, `group_by`), `reduce`
//! first writes the stream to the internal topic `{application.id}-{store}-repartition`
//! so that all records of a key meet in one task.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use rivulet_core::Result;
use rivulet_core::topology::{NodeId, ReduceFn, TopicRef, Topology, WindowedKeyFn};
use rivulet_core::types::{BoxedValue, StreamData};
use rivulet_core::window::{TimeWindow, TimeWindows, Windowed};

use crate::kstream::KStream;
use crate::options::Grouped;

/// A stream grouped by key, ready to be windowed.
pub struct KGroupedStream<K, V> {
    topology: Rc<RefCell<Topology>>,
    node: NodeId,
    repartition_required: bool,
    grouped: Grouped<K, V>,
}

impl<K, V> KGroupedStream<K, V>
where
    K: StreamData,
    V: StreamData,
{
    pub(crate) fn new(
        topology: Rc<RefCell<Topology>>,
        node: NodeId,
        repartition_required: bool,
        grouped: Grouped<K, V>,
    ) -> Self {
        Self {
            topology,
            node,
            repartition_required,
            grouped,
        }
    }

    pub fn windowed_by(self, windows: TimeWindows) -> TimeWindowedKStream<K, V> {
        TimeWindowedKStream {
            grouped: self,
            windows,
        }
    }
}

/// A grouped stream with a window specification.
pub struct TimeWindowedKStream<K, V> {
    grouped: KGroupedStream<K, V>,
    windows: TimeWindows,
}

impl<K, V> TimeWindowedKStream<K, V>
where
    K: StreamData,
    V: StreamData,
{
    /// Fold the values of each key and window with `reducer`, in arrival order.
    ///
    /// The first value of a window becomes its accumulator. Every update is
    /// emitted downstream. `store` names the window store and, when needed,
    /// the repartition topic.
    pub fn reduce<F>(self, reducer: F, store: &str) -> KTable<Windowed<K>, V>
    where
        F: Fn(&V, &V) -> V + Send + Sync + 'static,
    {
        let KGroupedStream {
            topology,
            node,
            repartition_required,
            grouped,
        } = self.grouped;

        let mut graph = topology.borrow_mut();
        let parent = if repartition_required {
            let topic = TopicRef::Internal(format!("{store}-repartition"));
            graph.add_sink(
                node,
                topic.clone(),
                grouped.key.clone(),
                grouped.value.clone(),
                None,
            );
            graph.add_source(topic, grouped.key.clone(), grouped.value.clone())
        } else {
            node
        };

        let reducer: ReduceFn = Arc::new(
            move |acc: &BoxedValue, value: &BoxedValue| -> Result<BoxedValue> {
                Ok(BoxedValue::new(reducer(acc.get::<V>()?, value.get::<V>()?)))
            },
        );
        let windowed_key: WindowedKeyFn =
            Arc::new(|key: &BoxedValue, window: TimeWindow| -> Result<BoxedValue> {
                Ok(BoxedValue::new(Windowed::new(key.get::<K>()?.clone(), window)))
            });
        let reduce = graph.add_windowed_reduce(
            parent,
            store,
            self.windows,
            grouped.key,
            reducer,
            windowed_key,
        );
        drop(graph);

        KTable {
            topology,
            node: reduce,
            _phantom: PhantomData,
        }
    }
}

/// A changelog of per-key values, here the output of a windowed aggregation.
pub struct KTable<K, V> {
    topology: Rc<RefCell<Topology>>,
    node: NodeId,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KTable<K, V>
where
    K: StreamData,
    V: StreamData,
{
    /// Every table update as a record.
    pub fn to_stream(&self) -> KStream<K, V> {
        KStream::new(Rc::clone(&self.topology), self.node, false)
    }
}

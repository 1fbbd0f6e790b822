use std::cell::RefCell;
use std::rc::Rc;

use rivulet_core::topology::{TopicRef, Topology};
use rivulet_core::types::StreamData;

use crate::kstream::KStream;
use crate::options::Consumed;

/// The entry point for describing a topology.
///
/// Add sources with [`stream`](Self::stream), chain operations on the returned
/// [`KStream`], then call [`build`](Self::build) and hand the result to a
/// [`StreamsRuntime`](rivulet_core::runtime::StreamsRuntime).
#[derive(Default)]
pub struct StreamsBuilder {
    pub(crate) topology: Rc<RefCell<Topology>>,
}

impl StreamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `topic` with the configured default serdes.
    pub fn stream<K, V>(&self, topic: &str) -> KStream<K, V>
    where
        K: StreamData,
        V: StreamData,
    {
        self.stream_with(topic, Consumed::default())
    }

    pub fn stream_with<K, V>(&self, topic: &str, consumed: Consumed<K, V>) -> KStream<K, V>
    where
        K: StreamData,
        V: StreamData,
    {
        let node = self.topology.borrow_mut().add_source(
            TopicRef::External(topic.to_string()),
            consumed.key,
            consumed.value,
        );
        KStream::new(Rc::clone(&self.topology), node, false)
    }

    /// Take the processor graph built so far.
    ///
    /// Streams created from this builder must not be extended afterwards;
    /// their nodes belong to the returned topology.
    pub fn build(self) -> Topology {
        std::mem::take(&mut *self.topology.borrow_mut())
    }
}

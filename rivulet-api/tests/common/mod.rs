#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use rivulet_api::StreamsBuilder;
use rivulet_api::options::Produced;
use rivulet_core::broker::Broker;
use rivulet_core::codec::{IntegerSerde, JsonSerde, StringSerde};
use rivulet_core::config::StreamsConfig;
use rivulet_core::producer::{Producer, ProducerConfig};
use rivulet_core::topology::Topology;
use rivulet_core::window::TimeWindows;

pub const BROKER: &str = "localhost:9092";
pub const INPUT: &str = "streamingTopic1";
pub const THROUGH: &str = "foos";
pub const OUTPUT: &str = "streamingTopic2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foo {
    pub name: String,
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn broker_with(topics: &[(&str, u32)]) -> Arc<Broker> {
    let broker = Arc::new(Broker::new(BROKER));
    for (name, partitions) in topics {
        broker.create_topic(*name, *partitions).unwrap();
    }
    broker
}

/// Integer keys, string values, fast polls and commits.
pub fn config(application_id: &str) -> StreamsConfig {
    StreamsConfig::from_props([
        ("application.id", application_id),
        ("bootstrap.servers", BROKER),
        ("default.key.serde", "integer"),
        ("default.value.serde", "string"),
        ("default.timestamp.extractor", "record"),
        ("commit.interval.ms", "10"),
        ("poll.ms", "10"),
    ])
    .unwrap()
}

pub fn producer(broker: &Arc<Broker>) -> Producer<i32, String> {
    Producer::new(
        Arc::clone(broker),
        IntegerSerde,
        StringSerde,
        ProducerConfig::default(),
    )
    .unwrap()
}

/// streamingTopic1 → upper-case → Foo → foos → name → 1 s windows of
/// concatenated names per key → values longer than 40 → streamingTopic2
pub fn reference_topology() -> Topology {
    let builder = StreamsBuilder::new();
    builder
        .stream::<i32, String>(INPUT)
        .map_values(|value: String| value.to_uppercase())
        .map(|key: i32, value: String| (key, Foo { name: value }))
        .through(THROUGH, Produced::with(IntegerSerde, JsonSerde::<Foo>::new()))
        .map(|key: i32, foo: Foo| (key, foo.name))
        .group_by_key()
        .windowed_by(TimeWindows::of(Duration::from_millis(1_000)))
        .reduce(|acc: &String, value: &String| format!("{acc}{value}"), "windowStore")
        .to_stream()
        .map(|key, value: String| (key.into_key(), value))
        .filter(|_key: &i32, value: &String| value.len() > 40)
        .to(OUTPUT);
    builder.build()
}

/// Per key, the concatenation of each 1 s window, unfiltered.
pub fn concat_topology(input: &str, output: &str) -> Topology {
    let builder = StreamsBuilder::new();
    builder
        .stream::<i32, String>(input)
        .group_by_key()
        .windowed_by(TimeWindows::of(Duration::from_millis(1_000)))
        .reduce(|acc: &String, value: &String| format!("{acc}{value}"), "concat")
        .to_stream()
        .map(|key, value: String| (key.into_key(), value))
        .to(output);
    builder.build()
}

/// Every value in `topic`, partition by partition.
pub fn read_values(broker: &Broker, topic: &str) -> Vec<String> {
    let handle = broker.topic(topic).unwrap();
    (0..handle.partition_count())
        .flat_map(|p| handle.read(p, 0, usize::MAX).unwrap())
        .map(|r| String::from_utf8(r.value.to_vec()).unwrap())
        .collect()
}

pub fn record_count(broker: &Broker, topic: &str) -> u64 {
    let handle = broker.topic(topic).unwrap();
    (0..handle.partition_count())
        .map(|p| handle.end_offset(p).unwrap())
        .sum()
}

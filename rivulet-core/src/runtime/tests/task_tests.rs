use crate::codec::{IntegerSerde, SerdeKind, SerdeSlot, StringSerde};
use crate::types::BoxedValue;
use crate::window::TimeWindow;

use super::*;

fn int_slot() -> SerdeSlot {
    SerdeSlot::explicit::<i32, _>(IntegerSerde)
}

fn string_slot() -> SerdeSlot {
    SerdeSlot::explicit::<String, _>(StringSerde)
}

fn concat() -> ReduceFn {
    Arc::new(|acc: &BoxedValue, value: &BoxedValue| -> Result<BoxedValue> {
        Ok(BoxedValue::new(format!(
            "{}{}",
            acc.get::<String>()?,
            value.get::<String>()?
        )))
    })
}

fn plain_key() -> WindowedKeyFn {
    Arc::new(|key: &BoxedValue, _window: TimeWindow| Ok(key.clone()))
}

fn setup() -> (Arc<Broker>, StreamsConfig) {
    let broker = Arc::new(Broker::new("localhost:9092"));
    broker.create_topic("in", 1).unwrap();
    broker.create_topic("out", 1).unwrap();
    (broker, StreamsConfig::new("app", "localhost:9092"))
}

/// in → reduce(windows) → out
fn windowed_topology(windows: TimeWindows) -> Topology {
    let mut t = Topology::new();
    let source = t.add_source(
        TopicRef::External("in".to_string()),
        int_slot(),
        string_slot(),
    );
    let reduce = t.add_windowed_reduce(source, "store", windows, int_slot(), concat(), plain_key());
    t.add_sink(
        reduce,
        TopicRef::External("out".to_string()),
        int_slot(),
        string_slot(),
        None,
    );
    t
}

fn single_task(topology: &Topology, broker: &Arc<Broker>, config: &StreamsConfig) -> StreamTask {
    let plan = Arc::new(TaskPlan::resolve(topology, config, broker).unwrap());
    let metrics = Arc::new(RuntimeMetrics::default());
    plan.create_tasks(config, broker, &metrics)
        .unwrap()
        .pop()
        .unwrap()
}

fn raw(key: i32, value: &str, timestamp: EventTime, offset: Offset) -> RawRecord {
    RawRecord {
        key: Bytes::copy_from_slice(&key.to_be_bytes()),
        value: Bytes::copy_from_slice(value.as_bytes()),
        timestamp,
        partition: 0,
        offset,
    }
}

fn output(broker: &Broker) -> Vec<String> {
    broker
        .topic("out")
        .unwrap()
        .read(0, 0, 100)
        .unwrap()
        .iter()
        .map(|r| String::from_utf8(r.value.to_vec()).unwrap())
        .collect()
}

#[test]
fn test_reduce_folds_in_arrival_order() {
    let (broker, config) = setup();
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let mut task = single_task(&topology, &broker, &config);

    task.process(&raw(0, "FOO1", 0, 0)).unwrap();
    task.process(&raw(0, "FOO2", 500, 1)).unwrap();
    task.process(&raw(0, "BAR", 1_500, 2)).unwrap();
    task.process(&raw(1, "X", 600, 3)).unwrap();

    // every update is emitted
    assert_eq!(output(&broker), vec!["FOO1", "FOO1FOO2", "BAR", "X"]);
    assert_eq!(task.position(), 4);
    assert_eq!(task.store("store").unwrap().len(), 3);
}

#[test]
fn test_hopping_windows_emit_per_window() {
    let (broker, config) = setup();
    let windows = TimeWindows::of(Duration::from_millis(1_000)).advance_by(Duration::from_millis(500));
    let topology = windowed_topology(windows);
    let mut task = single_task(&topology, &broker, &config);

    task.process(&raw(0, "a", 700, 0)).unwrap();
    task.process(&raw(0, "b", 1_200, 1)).unwrap();

    // 700 ∈ [0,1000) and [500,1500); 1200 ∈ [500,1500) and [1000,2000)
    assert_eq!(output(&broker), vec!["a", "a", "ab", "b"]);
}

#[test]
fn test_late_record_reopens_window_within_retention() {
    let (broker, config) = setup();
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let mut task = single_task(&topology, &broker, &config);

    task.process(&raw(0, "a", 100, 0)).unwrap();
    task.process(&raw(0, "b", 5_000, 1)).unwrap();
    task.process(&raw(0, "c", 200, 2)).unwrap();

    assert_eq!(output(&broker), vec!["a", "b", "ac"]);
    assert_eq!(task.store("store").unwrap().dropped_late(), 0);
}

#[test]
fn test_record_for_evicted_window_is_dropped() {
    let (broker, config) = setup();
    let windows = TimeWindows::of(Duration::from_millis(1_000)).until(Duration::from_millis(1_000));
    let topology = windowed_topology(windows);
    let mut task = single_task(&topology, &broker, &config);

    task.process(&raw(0, "a", 100, 0)).unwrap();
    task.process(&raw(0, "b", 5_000, 1)).unwrap();
    task.process(&raw(0, "late", 200, 2)).unwrap();

    assert_eq!(output(&broker), vec!["a", "b"]);
    assert_eq!(task.store("store").unwrap().dropped_late(), 1);
    assert_eq!(task.ctx.metrics.dropped_late_records(), 1);
    // the dropped record still counts as processed
    assert_eq!(task.position(), 3);
}

#[test]
fn test_transform_can_drop_and_fan_out() {
    let (broker, config) = setup();
    let mut t = Topology::new();
    let source = t.add_source(
        TopicRef::External("in".to_string()),
        int_slot(),
        string_slot(),
    );
    let long_only = t.add_transform(
        "KSTREAM-FILTER",
        source,
        Arc::new(|msg: Message| -> Result<Option<Message>> {
            Ok((msg.value.get::<String>()?.len() > 3).then_some(msg))
        }),
    );
    for parent in [source, long_only] {
        t.add_sink(
            parent,
            TopicRef::External("out".to_string()),
            int_slot(),
            string_slot(),
            None,
        );
    }
    let mut task = single_task(&t, &broker, &config);

    task.process(&raw(0, "abc", 0, 0)).unwrap();
    task.process(&raw(0, "abcd", 0, 1)).unwrap();

    assert_eq!(output(&broker), vec!["abc", "abcd", "abcd"]);
}

#[test]
fn test_pending_commit_tracks_progress() {
    let (broker, config) = setup();
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let mut task = single_task(&topology, &broker, &config);

    assert_eq!(task.pending_commit(), Some((TopicPartition::new("in", 0), 0)));
    task.mark_committed(0);
    assert_eq!(task.pending_commit(), None);

    task.process(&raw(0, "a", 0, 0)).unwrap();
    assert_eq!(task.pending_commit(), Some((TopicPartition::new("in", 0), 1)));
}

#[test]
fn test_task_starts_at_committed_offset() {
    let (broker, config) = setup();
    broker.commit("app", &[(TopicPartition::new("in", 0), 7)]);
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let task = single_task(&topology, &broker, &config);
    assert_eq!(task.position(), 7);
}

#[test]
fn test_default_serde_mismatch_is_config_error() {
    let (broker, config) = setup();
    let mut t = Topology::new();
    let source = t.add_source(
        TopicRef::External("in".to_string()),
        SerdeSlot::default_for::<i32>(),
        SerdeSlot::default_for::<String>(),
    );
    t.add_sink(
        source,
        TopicRef::External("out".to_string()),
        SerdeSlot::default_for::<i32>(),
        SerdeSlot::default_for::<String>(),
        None,
    );

    // bytes defaults cannot produce i32 keys
    assert!(matches!(
        TaskPlan::resolve(&t, &config, &broker),
        Err(StreamsError::Config(_))
    ));

    let config = config
        .with_default_key_serde(SerdeKind::Integer)
        .with_default_value_serde(SerdeKind::String);
    assert!(TaskPlan::resolve(&t, &config, &broker).is_ok());
}

#[test]
fn test_missing_source_topic_is_config_error() {
    let broker = Arc::new(Broker::new("localhost:9092"));
    broker.create_topic("out", 1).unwrap();
    let config = StreamsConfig::new("app", "localhost:9092");
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let err = TaskPlan::resolve(&topology, &config, &broker).unwrap_err();
    assert!(matches!(err, StreamsError::Config(msg) if msg.contains("in")));
}

#[test]
fn test_internal_topics_are_prefixed_and_sized() {
    let broker = Arc::new(Broker::new("localhost:9092"));
    broker.create_topic("in", 3).unwrap();
    let config = StreamsConfig::new("app", "localhost:9092");

    let mut t = Topology::new();
    let source = t.add_source(
        TopicRef::External("in".to_string()),
        int_slot(),
        string_slot(),
    );
    t.add_sink(
        source,
        TopicRef::Internal("s-repartition".to_string()),
        int_slot(),
        string_slot(),
        None,
    );
    t.add_source(
        TopicRef::Internal("s-repartition".to_string()),
        int_slot(),
        string_slot(),
    );

    let plan = TaskPlan::resolve(&t, &config, &broker).unwrap();
    assert_eq!(plan.internal_topics(), ["app-s-repartition".to_string()]);
    assert_eq!(plan.internal_partitions(), 3);
}

#[test]
fn test_deleted_sink_topic_fails_record() {
    let (broker, config) = setup();
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let mut task = single_task(&topology, &broker, &config);
    broker.delete_topic("out").unwrap();

    let err = task.process(&raw(0, "a", 0, 0)).unwrap_err();
    assert_eq!(
        err,
        StreamsError::Broker(crate::error::BrokerError::UnknownTopic("out".to_string()))
    );
    assert_eq!(task.position(), 0);
}

#[test]
fn test_reduce_near_max_timestamp() {
    let (broker, config) = setup();
    let topology = windowed_topology(TimeWindows::of(Duration::from_millis(1_000)));
    let mut task = single_task(&topology, &broker, &config);

    task.process(&raw(0, "a", EventTime::MAX - 10, 0)).unwrap();
    task.process(&raw(0, "b", EventTime::MAX - 5, 1)).unwrap();

    assert_eq!(output(&broker), vec!["a", "ab"]);
    let store = task.store("store").unwrap();
    assert_eq!(store.dropped_late(), 0);
    let window = store.iter().next().unwrap().window;
    assert_eq!(window.end, EventTime::MAX);
    assert!(window.contains(EventTime::MAX - 10));
}

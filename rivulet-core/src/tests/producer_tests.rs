use crate::codec::{IntegerSerde, StringSerde};
use crate::types::TopicPartition;

use super::*;

fn setup(partitions: u32) -> Arc<Broker> {
    let broker = Arc::new(Broker::new("localhost:9092"));
    broker.create_topic("in", partitions).unwrap();
    broker
}

fn producer(broker: &Arc<Broker>, config: ProducerConfig) -> Producer<i32, String> {
    Producer::new(Arc::clone(broker), IntegerSerde, StringSerde, config).unwrap()
}

#[test]
fn test_send_returns_metadata() {
    let broker = setup(1);
    let producer = producer(&broker, ProducerConfig::default());

    let first = producer
        .send_at("in", &0, &"foo1".to_string(), 10)
        .unwrap()
        .wait()
        .unwrap();
    let second = producer
        .send_at("in", &0, &"foo2".to_string(), 20)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(first.topic, "in");
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 1);
    assert_eq!(second.timestamp, 20);

    let stored = broker.topic("in").unwrap().read(0, 0, 10).unwrap();
    assert_eq!(stored[0].key, Bytes::copy_from_slice(&0i32.to_be_bytes()));
    assert_eq!(stored[1].value, Bytes::from_static(b"foo2"));
}

#[test]
fn test_flush_waits_for_all_sends() {
    let broker = setup(3);
    let producer = producer(&broker, ProducerConfig::default());

    for i in 0..100 {
        // Receipts are dropped; flush alone must cover delivery.
        producer.send("in", &i, &format!("v{i}")).unwrap();
    }
    producer.flush();

    let topic = broker.topic("in").unwrap();
    let total: u64 = (0..3).map(|p| topic.end_offset(p).unwrap()).sum();
    assert_eq!(total, 100);
}

#[test]
fn test_same_key_same_partition() {
    let broker = setup(4);
    let producer = producer(&broker, ProducerConfig::default());

    let a = producer.send("in", &7, &"a".to_string()).unwrap().wait().unwrap();
    let b = producer.send("in", &7, &"b".to_string()).unwrap().wait().unwrap();
    assert_eq!(a.partition, b.partition);
    assert_eq!(
        a.partition,
        DefaultPartitioner.partition("in", &7i32.to_be_bytes(), 4)
    );
}

#[test]
fn test_send_to_partition() {
    let broker = setup(2);
    let producer = producer(&broker, ProducerConfig::default());
    let meta = producer
        .send_to_partition("in", 1, &0, &"x".to_string(), 5)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(meta.partition, 1);

    let err = producer
        .send_to_partition("in", 9, &0, &"x".to_string(), 5)
        .unwrap()
        .wait()
        .unwrap_err();
    assert_eq!(
        err,
        StreamsError::Broker(BrokerError::UnknownPartition(TopicPartition::new("in", 9)))
    );
}

#[test]
fn test_transient_failure_is_retried() {
    let broker = setup(1);
    let config = ProducerConfig {
        retries: 50,
        retry_backoff: Duration::from_millis(10),
        ..ProducerConfig::default()
    };
    let producer = producer(&broker, config);

    broker.set_available(false);
    let restorer = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            broker.set_available(true);
        })
    };

    let meta = producer
        .send_at("in", &1, &"retry".to_string(), 0)
        .unwrap()
        .wait()
        .unwrap();
    restorer.join().unwrap();
    assert_eq!(meta.offset, 0);
}

#[test]
fn test_retries_exhausted_fails_receipt() {
    let broker = setup(1);
    let config = ProducerConfig {
        retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..ProducerConfig::default()
    };
    let producer = producer(&broker, config);

    broker.set_available(false);
    let err = producer
        .send_at("in", &1, &"lost".to_string(), 0)
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(err, StreamsError::Broker(BrokerError::Unavailable(_))));
}

#[test]
fn test_send_unknown_topic_fails_fast() {
    let broker = setup(1);
    let producer = producer(&broker, ProducerConfig::default());
    let err = producer.send("nope", &1, &"x".to_string()).unwrap_err();
    assert_eq!(
        err,
        StreamsError::Broker(BrokerError::UnknownTopic("nope".to_string()))
    );
}

#[test]
fn test_send_default() {
    let broker = setup(1);
    let without = producer(&broker, ProducerConfig::default());
    assert!(matches!(
        without.send_default(&1, &"x".to_string()),
        Err(StreamsError::Producer(_))
    ));

    let with = producer(
        &broker,
        ProducerConfig {
            default_topic: Some("in".to_string()),
            ..ProducerConfig::default()
        },
    );
    let meta = with.send_default(&1, &"x".to_string()).unwrap().wait().unwrap();
    assert_eq!(meta.topic, "in");
}

#[test]
fn test_close_drains_and_rejects_new_sends() {
    let broker = setup(1);
    let mut producer = producer(&broker, ProducerConfig::default());
    let receipt = producer.send("in", &1, &"last".to_string()).unwrap();
    producer.close();

    assert!(receipt.wait().is_ok());
    assert!(matches!(
        producer.send("in", &1, &"after".to_string()),
        Err(StreamsError::Producer(_))
    ));
}

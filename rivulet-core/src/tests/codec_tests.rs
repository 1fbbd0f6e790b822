use super::*;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Foo {
    name: String,
}

#[test]
fn test_integer_serde_is_big_endian() {
    let bytes = IntegerSerde.serialize("t", &1).unwrap();
    assert_eq!(&bytes[..], &[0, 0, 0, 1]);
    assert_eq!(IntegerSerde.deserialize("t", &bytes).unwrap(), 1);
    assert_eq!(
        IntegerSerde
            .deserialize("t", &IntegerSerde.serialize("t", &-7).unwrap())
            .unwrap(),
        -7
    );
}

#[test]
fn test_integer_serde_rejects_wrong_width() {
    let err = IntegerSerde.deserialize("ints", &[1, 2, 3]).unwrap_err();
    match err {
        SerdeError::Deserialize { topic, reason } => {
            assert_eq!(topic, "ints");
            assert!(reason.contains("expected 4 bytes"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_long_serde() {
    let bytes = LongSerde.serialize("t", &(1i64 << 40)).unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(LongSerde.deserialize("t", &bytes).unwrap(), 1i64 << 40);
}

#[test]
fn test_string_serde_rejects_invalid_utf8() {
    assert_eq!(
        StringSerde.deserialize("t", "héllo".as_bytes()).unwrap(),
        "héllo"
    );
    assert!(StringSerde.deserialize("t", &[0xff, 0xfe]).is_err());
}

#[test]
fn test_json_serde_struct() {
    let serde = JsonSerde::<Foo>::new();
    let bytes = serde
        .serialize(
            "foos",
            &Foo {
                name: "FOO".to_string(),
            },
        )
        .unwrap();
    assert_eq!(&bytes[..], br#"{"name":"FOO"}"#);
    assert_eq!(
        serde.deserialize("foos", &bytes).unwrap(),
        Foo {
            name: "FOO".to_string()
        }
    );
    assert!(serde.deserialize("foos", b"not json").is_err());
}

#[test]
fn test_bincode_serde_struct() {
    let serde = BincodeSerde::<(String, i64)>::new();
    let value = ("k".to_string(), 99);
    let bytes = serde.serialize("t", &value).unwrap();
    assert_eq!(serde.deserialize("t", &bytes).unwrap(), value);
}

#[test]
fn test_windowed_serde_layout() {
    let serde = WindowedSerde::new(IntegerSerde, Duration::from_secs(1));
    let key = Windowed::new(5, TimeWindow::new(3_000, 4_000));
    let bytes = serde.serialize("t", &key).unwrap();
    assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
    assert_eq!(&bytes[4..], &3_000i64.to_be_bytes());

    let decoded: Windowed<i32> = serde.deserialize("t", &bytes).unwrap();
    assert_eq!(decoded, key);
    assert!(
        <WindowedSerde<IntegerSerde> as Serde<Windowed<i32>>>::deserialize(&serde, "t", &[1])
            .is_err()
    );

    let last = Windowed::new(5, TimeWindow::new(EventTime::MAX - 500, EventTime::MAX));
    let bytes = serde.serialize("t", &last).unwrap();
    assert_eq!(serde.deserialize("t", &bytes).unwrap(), last);
}

#[test]
fn test_serde_kind_parsing() {
    assert_eq!("integer".parse::<SerdeKind>().unwrap(), SerdeKind::Integer);
    assert_eq!(" String ".parse::<SerdeKind>().unwrap(), SerdeKind::String);
    assert_eq!("bytearray".parse::<SerdeKind>().unwrap(), SerdeKind::Bytes);
    assert!(matches!(
        "avro".parse::<SerdeKind>(),
        Err(StreamsError::Config(_))
    ));
    assert_eq!(SerdeKind::Long.to_string(), "long");
}

#[test]
fn test_erased_serde_roundtrip_and_mismatch() {
    let serde = SerdeKind::String.erased();
    let bytes = serde
        .serialize("t", &BoxedValue::new("abc".to_string()))
        .unwrap();
    let back = serde.deserialize("t", &bytes).unwrap();
    assert_eq!(back.get::<String>().unwrap(), "abc");

    let err = serde.serialize("t", &BoxedValue::new(1i32)).unwrap_err();
    assert!(matches!(err, StreamsError::TypeMismatch { .. }));
}

#[test]
fn test_serde_slot_resolution() {
    let slot = SerdeSlot::default_for::<i32>();
    assert!(!slot.is_explicit());
    assert_eq!(slot.resolve(SerdeKind::Integer).unwrap().type_id(), TypeId::of::<i32>());
    assert!(matches!(
        slot.resolve(SerdeKind::String),
        Err(StreamsError::Config(_))
    ));

    let explicit = SerdeSlot::explicit::<Foo, _>(JsonSerde::<Foo>::new());
    assert!(explicit.is_explicit());
    assert_eq!(
        explicit.resolve(SerdeKind::Bytes).unwrap().type_id(),
        TypeId::of::<Foo>()
    );
}

use super::*;

#[test]
fn test_default_partitioner_same_key_same_partition() {
    let partitioner = DefaultPartitioner;

    let p1 = partitioner.partition("t", b"user_1", 4);
    let p2 = partitioner.partition("t", b"user_1", 4);

    // Same key should go to same partition
    assert_eq!(p1, p2);
}

#[test]
fn test_default_partitioner_distribution() {
    let partitioner = DefaultPartitioner;

    let mut counts = vec![0; 4];
    for i in 0..1000 {
        let key = format!("user_{}", i);
        let partition = partitioner.partition("t", key.as_bytes(), 4);
        counts[partition as usize] += 1;
    }

    // Each partition should get roughly 250 keys (1000 / 4)
    for count in counts {
        assert!(
            count > 180 && count < 320,
            "Unbalanced distribution: {}",
            count
        );
    }
}

#[test]
fn test_default_partitioner_within_bounds() {
    let partitioner = DefaultPartitioner;

    for i in 0..100u32 {
        let key = i.to_be_bytes();
        let partition = partitioner.partition("t", &key, 3);
        assert!(partition < 3);
    }
    assert_eq!(partitioner.partition("t", b"any", 1), 0);
}

#[test]
fn test_closure_partitioner() {
    let last_byte = |_topic: &str, key: &[u8], n: u32| {
        u32::from(key.last().copied().unwrap_or(0)) % n
    };
    assert_eq!(last_byte.partition("t", &[0, 0, 0, 5], 4), 1);
    assert_eq!(last_byte.partition("t", &[], 4), 0);
}

//! Integration tests for the byte ring

use argon_core::DataBuffer;

#[test]
fn test_push_pull_round_trip() {
    let mut buf = DataBuffer::new(16, 64);
    let data: Vec<u8> = (0..40).collect();
    buf.push_exact_force(&data);

    let mut out = vec![0u8; 40];
    assert_eq!(buf.pull(&mut out), 40);
    assert_eq!(out, data);
}

#[test]
fn test_pull_from_empty_returns_zero() {
    let mut buf = DataBuffer::new(8, 8);
    let mut out = [0u8; 4];
    assert_eq!(buf.pull(&mut out), 0);
}

#[test]
fn test_partial_pull_keeps_remainder() {
    let mut buf = DataBuffer::new(8, 8);
    buf.push_exact_force(&[1, 2, 3, 4, 5]);

    let mut out = [0u8; 2];
    assert_eq!(buf.pull(&mut out), 2);
    assert_eq!(out, [1, 2]);
    assert_eq!(buf.len(), 3);

    let mut rest = [0u8; 3];
    assert_eq!(buf.pull(&mut rest), 3);
    assert_eq!(rest, [3, 4, 5]);
}

/// Hard-max eviction drops exactly the earliest `total - hard_max`
/// bytes; everything later is intact and in order.
#[test]
fn test_eviction_drops_exactly_the_oldest_bytes() {
    let hard_max = 32;
    let mut buf = DataBuffer::new(8, hard_max);

    let total: Vec<u8> = (0..48).collect();
    for chunk in total.chunks(7) {
        buf.push_exact_force(chunk);
    }

    assert_eq!(buf.len(), hard_max);

    let mut out = vec![0u8; hard_max];
    buf.pull(&mut out);

    let dropped = total.len() - hard_max;
    assert_eq!(out, &total[dropped..]);
}

#[test]
fn test_oversized_push_keeps_its_tail() {
    let mut buf = DataBuffer::new(4, 8);
    let data: Vec<u8> = (0..20).collect();
    buf.push_exact_force(&data);

    assert_eq!(buf.len(), 8);
    let mut out = vec![0u8; 8];
    buf.pull(&mut out);
    assert_eq!(out, &data[12..]);
}

#[test]
fn test_free_space_and_enough_data_predicates() {
    let mut buf = DataBuffer::new(8, 16);
    assert!(buf.has_free_space(16));
    assert!(!buf.has_free_space(17));
    assert!(!buf.has_enough_data(1));

    buf.push_exact_force(&[0; 10]);
    assert!(buf.has_enough_data(10));
    assert!(!buf.has_enough_data(11));
    assert!(buf.has_free_space(6));
    assert!(!buf.has_free_space(7));
}

#[test]
fn test_discard_exact() {
    let mut buf = DataBuffer::new(8, 8);
    buf.push_exact_force(&[1, 2, 3, 4]);
    buf.discard_exact(2);

    let mut out = [0u8; 2];
    assert_eq!(buf.pull(&mut out), 2);
    assert_eq!(out, [3, 4]);
}

#[test]
fn test_clear() {
    let mut buf = DataBuffer::new(8, 8);
    buf.push_exact_force(&[1, 2, 3]);
    buf.clear();
    assert!(buf.is_empty());

    buf.push_exact_force(&[9]);
    let mut out = [0u8; 1];
    buf.pull(&mut out);
    assert_eq!(out, [9]);
}

#[test]
fn test_interleaved_producer_consumer_order() {
    let mut buf = DataBuffer::new(4, 1024);
    let mut pushed = Vec::new();
    let mut pulled = Vec::new();

    for round in 0u8..50 {
        let chunk = [round, round.wrapping_mul(3)];
        buf.push_exact_force(&chunk);
        pushed.extend_from_slice(&chunk);

        if round % 3 == 0 {
            let mut out = [0u8; 3];
            let n = buf.pull(&mut out);
            pulled.extend_from_slice(&out[..n]);
        }
    }

    let mut rest = vec![0u8; buf.len()];
    buf.pull(&mut rest);
    pulled.extend_from_slice(&rest);

    assert_eq!(pulled, pushed);
}

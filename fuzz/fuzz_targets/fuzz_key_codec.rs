//! Fuzz target for the keyspace codec.
//!
//! Tests that the key, varint, and key-path decoders never panic on
//! arbitrary input, that whatever decodes survives its own re-encoding,
//! and that the keyspace comparator is total and symmetric on arbitrary
//! byte strings.

#![no_main]

use libfuzzer_sys::fuzz_target;

use strata_db::keys::{compare, decode_int, decode_key, decode_key_path, decode_var_int, encode_key};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let selector = data[0] % 4;
    let payload = &data[1..];

    match selector {
        0 => fuzz_key(payload),
        1 => fuzz_var_int(payload),
        2 => fuzz_key_path(payload),
        _ => fuzz_compare(payload),
    }
});

fn fuzz_key(data: &[u8]) {
    let mut slice = data;
    if let Some(key) = decode_key(&mut slice) {
        let consumed = data.len() - slice.len();
        assert!(consumed <= data.len(), "decoder consumed more than the input");

        let reencoded = encode_key(&key);
        let mut roundtrip = reencoded.as_slice();
        let again = decode_key(&mut roundtrip);
        assert_eq!(again, Some(key), "key roundtrip mismatch");
        assert!(roundtrip.is_empty(), "re-encoding left trailing bytes");
    }
}

fn fuzz_var_int(data: &[u8]) {
    let mut slice = data;
    if let Some(value) = decode_var_int(&mut slice) {
        assert!(value >= 0, "varints are non-negative");
    }
    let _ = decode_int(data);
}

fn fuzz_key_path(data: &[u8]) {
    let _ = decode_key_path(data);
}

fn fuzz_compare(data: &[u8]) {
    let mid = data.len() / 2;
    let (a, b) = data.split_at(mid);
    let forward = compare(a, b, false);
    let backward = compare(b, a, false);
    assert_eq!(forward, backward.reverse(), "comparator must be symmetric");
    assert_eq!(compare(a, a, false), std::cmp::Ordering::Equal);
    let _ = compare(a, b, true);
}

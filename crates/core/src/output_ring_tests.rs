// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn append_accumulates_under_capacity() {
    let mut ring = OutputRing::with_capacity(64);
    ring.append("hello ");
    ring.append("world");
    assert_eq!(ring.as_str(), "hello world");
}

#[test]
fn eviction_keeps_the_newest_bytes() {
    let mut ring = OutputRing::with_capacity(8);
    ring.append("abcdef");
    ring.append("ghij");
    assert_eq!(ring.as_str(), "cdefghij");
    assert_eq!(ring.len(), 8);
}

#[test]
fn oversized_append_keeps_only_the_tail() {
    let mut ring = OutputRing::with_capacity(4);
    ring.append("0123456789");
    assert_eq!(ring.as_str(), "6789");
}

#[test]
fn eviction_respects_char_boundaries() {
    let mut ring = OutputRing::with_capacity(6);
    // 'é' is two bytes; eviction must not split it.
    ring.append("ééé");
    ring.append("ab");
    assert!(ring.len() <= 6);
    assert!(std::str::from_utf8(ring.as_str().as_bytes()).is_ok());
    assert!(ring.as_str().ends_with("ab"));
}

#[test]
fn tail_lines_returns_most_recent_in_order() {
    let mut ring = OutputRing::with_capacity(1024);
    ring.append("one\ntwo\nthree\nfour\n");
    assert_eq!(ring.tail_lines(2), vec!["three", "four"]);
    assert_eq!(ring.tail_lines(10).len(), 4);
}

#[test]
fn reset_clears_but_keeps_capacity() {
    let mut ring = OutputRing::with_capacity(16);
    ring.append("some text");
    ring.reset();
    assert!(ring.is_empty());
    assert_eq!(ring.capacity(), 16);
}

#[test]
fn round_trips_through_serde() {
    let mut ring = OutputRing::with_capacity(32);
    ring.append("persisted tail");
    let json = serde_json::to_string(&ring).unwrap();
    let back: OutputRing = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ring);
}

proptest::proptest! {
    /// The ring never exceeds its capacity and stays valid UTF-8, for
    /// any append sequence.
    #[test]
    fn bounded_and_utf8_for_arbitrary_appends(
        chunks in proptest::collection::vec(".{0,40}", 0..20),
        capacity in 1usize..128,
    ) {
        let mut ring = OutputRing::with_capacity(capacity);
        for chunk in &chunks {
            ring.append(chunk);
            proptest::prop_assert!(ring.len() <= capacity);
            proptest::prop_assert!(std::str::from_utf8(ring.as_str().as_bytes()).is_ok());
        }
    }
}

mod common;

use std::time::Instant;

use trie_fifo::ResultStatus;
use trie_fifo::constants::INLINE_VALUE_CAPACITY;
use trie_fifo::memory_trie::MemoryTrie;
use trie_fifo::request_flow;
use trie_fifo::response_flow::{Collector, FindResult, TraverseEvent};

fn collect_finds(collector: &mut Collector<'_, MemoryTrie>, n: usize) -> Vec<FindResult> {
    let deadline = Instant::now() + common::WAIT;
    let mut out = Vec::new();
    while out.len() < n {
        collector.poll_finds(&mut out);
        assert!(Instant::now() < deadline, "timed out collecting finds");
        std::thread::yield_now();
    }
    out
}

#[test]
fn collector_reassembles_large_and_inline_values() {
    let big = vec![3u8; INLINE_VALUE_CAPACITY * 4];
    let pairs = [(&b"big"[..], &big[..]), (&b"tiny"[..], &b"t"[..])];
    let pipeline = common::started_pipeline(&pairs, 5, 2);
    request_flow::submit_find_value(&pipeline, b"big", 5, 1).expect("submit");
    request_flow::submit_find_node(&pipeline, b"tiny", 5, 2).expect("submit");
    request_flow::submit_find_value(&pipeline, b"none", 5, 3).expect("submit");

    let mut collector = Collector::new(&pipeline);
    let mut results = collect_finds(&mut collector, 3);
    results.sort_by_key(|r| r.user_data);

    assert_eq!(results[0].status, ResultStatus::Ok);
    assert!(results[0].has_large_value);
    assert_eq!(results[0].value, big);

    assert_eq!(results[1].status, ResultStatus::Ok);
    assert!(!results[1].has_large_value);
    assert_eq!(results[1].value, b"t");
    assert_ne!(results[1].merkle_hash, [0u8; 32]);

    assert_eq!(results[2].status, ResultStatus::NotFound);
    assert!(results[2].value.is_empty());
    assert_eq!(collector.pending_large_values(), 0);
}

#[test]
fn collector_pairs_traversal_large_values_in_order() {
    let v1 = vec![1u8; 300];
    let v3 = vec![3u8; 400];
    let pairs = [
        (&b"p1"[..], &v1[..]),
        (&b"p2"[..], &b"two"[..]),
        (&b"p3"[..], &v3[..]),
    ];
    let pipeline = common::started_pipeline(&pairs, 5, 2);
    request_flow::submit_traverse(&pipeline, b"p", 5, 0, 77).expect("submit");

    let mut collector = Collector::with_batch(&pipeline, 1);
    let deadline = Instant::now() + common::WAIT;
    let mut events = Vec::new();
    while !matches!(events.last(), Some(TraverseEvent::End { .. })) {
        collector.poll_traversals(&mut events);
        assert!(Instant::now() < deadline, "timed out collecting traversal");
        std::thread::yield_now();
    }

    let values: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TraverseEvent::Item { value, .. } => Some(value.clone()),
            TraverseEvent::End { .. } => None,
        })
        .collect();
    assert_eq!(values, vec![v1, b"two".to_vec(), v3]);
    assert!(events.iter().all(|e| e.user_data() == 77));
    match &events[1] {
        TraverseEvent::Item {
            has_large_value,
            path,
            ..
        } => {
            assert!(!has_large_value);
            assert_eq!(&path[..2], b"p2");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(collector.pending_large_values(), 0);
}

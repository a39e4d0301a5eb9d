#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trie_fifo::engine::Update;
use trie_fifo::memory_trie::MemoryTrie;
use trie_fifo::{Completion, Pipeline, ResultStatus};

pub const WAIT: Duration = Duration::from_secs(20);

/// Engine with `pairs` committed at `version`.
pub fn trie_with<K: AsRef<[u8]>, V: AsRef<[u8]>>(pairs: &[(K, V)], version: u64) -> MemoryTrie {
    let trie = MemoryTrie::new();
    let updates: Vec<_> = pairs
        .iter()
        .map(|(k, v)| Update::put(k.as_ref(), v.as_ref()))
        .collect();
    trie.commit(&updates, version).expect("commit");
    trie
}

/// Started pipeline over `pairs` committed at `version`.
pub fn started_pipeline<K: AsRef<[u8]>, V: AsRef<[u8]>>(
    pairs: &[(K, V)],
    version: u64,
    workers: usize,
) -> Pipeline<MemoryTrie> {
    let pipeline = Pipeline::new(Arc::new(trie_with(pairs, version)));
    pipeline.start(workers).expect("start");
    pipeline
}

/// Poll until one completion arrives.
pub fn next_completion(pipeline: &Pipeline<MemoryTrie>) -> Box<Completion> {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(comp) = pipeline.poll_completion() {
            return comp;
        }
        assert!(Instant::now() < deadline, "timed out waiting for a completion");
        thread::yield_now();
    }
}

/// Poll the traverse channel until a TraverseEnd arrives; returns every record in order.
pub fn traverse_stream(pipeline: &Pipeline<MemoryTrie>) -> Vec<Box<Completion>> {
    let deadline = Instant::now() + WAIT;
    let mut out = Vec::new();
    loop {
        if let Some(comp) = pipeline.poll_traverse() {
            let end = comp.status() == ResultStatus::TraverseEnd;
            out.push(comp);
            if end {
                return out;
            }
            continue;
        }
        assert!(Instant::now() < deadline, "timed out waiting for TraverseEnd");
        thread::yield_now();
    }
}

/// Give workers a moment, then assert nothing further was posted.
pub fn assert_quiet(pipeline: &Pipeline<MemoryTrie>) {
    thread::sleep(Duration::from_millis(50));
    assert!(pipeline.poll_completion().is_none(), "unexpected extra completion");
    assert!(pipeline.poll_traverse().is_none(), "unexpected extra traverse record");
    assert!(pipeline.poll_large_value().is_none(), "unexpected extra large value");
}

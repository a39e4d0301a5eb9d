#![allow(dead_code)]

use std::sync::Arc;

use trie_fifo::Pipeline;
use trie_fifo::engine::Update;
use trie_fifo::memory_trie::MemoryTrie;

pub const VERSION: u64 = 1;

pub fn key(i: u64) -> Vec<u8> {
    format!("bench-key-{i:08}").into_bytes()
}

/// Pipeline over `keys` committed keys with short inline values.
pub fn populated_pipeline(keys: u64) -> Pipeline<MemoryTrie> {
    let trie = MemoryTrie::new();
    let updates: Vec<_> = (0..keys)
        .map(|i| Update::put(key(i), format!("value-{i}")))
        .collect();
    trie.commit(&updates, VERSION).expect("commit");
    Pipeline::new(Arc::new(trie))
}

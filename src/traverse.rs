//! Traverse adapter: turns an engine subtree walk into TraverseMore records.
//!
//! The adapter tracks the full nibble path of the node being visited. The
//! walk starts at the node found for the request prefix, so the path begins
//! as the prefix itself; each child then appends its branch nibble and its
//! own compressed segment, and `up` removes them again.

use crate::engine::{TraverseVisitor, TrieNode};
use crate::metrics::Channel;
use crate::protocol::{bytes_to_nibbles, pack_path};
use crate::records::ResultStatus;
use crate::worker::Channels;

pub(crate) struct TraverseAdapter<'a> {
    channels: &'a Channels,
    user_data: u128,
    path: Vec<u8>,
    limit: u32,
    emitted: u32,
}

impl<'a> TraverseAdapter<'a> {
    pub(crate) fn new(channels: &'a Channels, user_data: u128, prefix: &[u8], limit: u32) -> Self {
        Self {
            channels,
            user_data,
            path: bytes_to_nibbles(prefix),
            limit,
            emitted: 0,
        }
    }

    /// Valued nodes seen so far, including any whose record had to be dropped.
    pub(crate) fn emitted(&self) -> u32 {
        self.emitted
    }

    fn emit(&mut self, value: &[u8]) {
        self.emitted += 1;
        let Some(mut comp) =
            self.channels
                .alloc_completion(self.user_data, ResultStatus::TraverseMore, Channel::Traverse)
        else {
            return;
        };
        if !self.channels.attach_value(&mut comp, self.user_data, value) {
            return;
        }
        comp.side_payload = pack_path(&self.path);
        self.channels.post_traverse(comp);
    }
}

impl<N: TrieNode> TraverseVisitor<N> for TraverseAdapter<'_> {
    fn down(&mut self, branch: Option<u8>, node: &N) -> bool {
        if self.emitted >= self.limit {
            return false;
        }
        // The start node's own segment is already part of the prefix.
        if let Some(branch) = branch {
            self.path.push(branch);
            self.path.extend_from_slice(node.path_nibbles());
        }
        if let Some(value) = node.value() {
            self.emit(value);
        }
        true
    }

    fn up(&mut self, branch: Option<u8>, node: &N) {
        if branch.is_some() {
            let keep = self
                .path
                .len()
                .saturating_sub(1 + node.path_nibbles().len());
            self.path.truncate(keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{INLINE_VALUE_CAPACITY, LARGE_VALUE_SENTINEL};
    use crate::engine::{TrieEngine, Update};
    use crate::memory_trie::MemoryTrie;
    use crate::protocol::path_truncated;

    fn trie(pairs: &[(Vec<u8>, Vec<u8>)]) -> MemoryTrie {
        let trie = MemoryTrie::new();
        let updates: Vec<_> = pairs
            .iter()
            .map(|(k, v)| Update::put(k.clone(), v.clone()))
            .collect();
        trie.commit(&updates, 5).expect("commit");
        trie
    }

    async fn walk(engine: &MemoryTrie, channels: &Channels, prefix: &[u8], limit: u32) -> u32 {
        let start = engine
            .find(prefix, 5)
            .await
            .expect("find")
            .expect("prefix present");
        let mut adapter = TraverseAdapter::new(channels, 1, prefix, limit);
        engine
            .traverse(&start, &mut adapter, 5, limit as usize)
            .await
            .expect("traverse");
        assert!(
            adapter.path == bytes_to_nibbles(prefix),
            "path must unwind back to the prefix"
        );
        adapter.emitted()
    }

    fn drain(channels: &Channels) -> Vec<Box<crate::records::Completion>> {
        let mut out = Vec::new();
        channels.traversals.dequeue_into(&mut out, usize::MAX);
        out
    }

    #[tokio::test]
    async fn emits_full_key_paths_in_order() {
        let engine = trie(&[
            (b"ab".to_vec(), b"2".to_vec()),
            (b"aa".to_vec(), b"1".to_vec()),
            (b"ac".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"x".to_vec()),
        ]);
        let channels = Channels::new();
        assert_eq!(walk(&engine, &channels, b"a", 100).await, 3);

        let records = drain(&channels);
        let keys: Vec<_> = records.iter().map(|c| c.side_payload[..2].to_vec()).collect();
        assert_eq!(keys, vec![b"aa".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);
        for (record, value) in records.iter().zip([b"1", b"2", b"3"]) {
            assert_eq!(record.status(), ResultStatus::TraverseMore);
            assert_eq!(record.inline_value(), Some(&value[..]));
        }
    }

    #[tokio::test]
    async fn start_node_value_is_emitted_with_prefix_path() {
        let engine = trie(&[(b"a".to_vec(), b"root".to_vec()), (b"ab".to_vec(), b"child".to_vec())]);
        let channels = Channels::new();
        assert_eq!(walk(&engine, &channels, b"a", 100).await, 2);
        let records = drain(&channels);
        assert_eq!(records[0].inline_value(), Some(&b"root"[..]));
        assert_eq!(records[0].side_payload[0], b'a');
        assert_eq!(records[0].side_payload[1], 0);
        assert_eq!(&records[1].side_payload[..2], b"ab");
    }

    #[tokio::test]
    async fn limit_stops_the_walk() {
        let engine = trie(&[
            (b"aa".to_vec(), b"1".to_vec()),
            (b"ab".to_vec(), b"2".to_vec()),
            (b"ac".to_vec(), b"3".to_vec()),
        ]);
        let channels = Channels::new();
        assert_eq!(walk(&engine, &channels, b"a", 2).await, 2);
        assert_eq!(drain(&channels).len(), 2);
    }

    #[tokio::test]
    async fn long_keys_are_marked_truncated() {
        let key = vec![0x11u8; 40];
        let engine = trie(&[(key.clone(), b"v".to_vec())]);
        let channels = Channels::new();
        assert_eq!(walk(&engine, &channels, &key[..4], 10).await, 1);
        let record = drain(&channels).pop().expect("record");
        assert!(path_truncated(&record.side_payload));
        assert_eq!(&record.side_payload[..31], &key[..31]);
    }

    #[tokio::test]
    async fn large_values_precede_their_record() {
        let big = vec![5u8; INLINE_VALUE_CAPACITY * 2];
        let engine = trie(&[(b"k1".to_vec(), big.clone()), (b"k2".to_vec(), b"s".to_vec())]);
        let channels = Channels::new();
        assert_eq!(walk(&engine, &channels, b"k", 10).await, 2);
        let records = drain(&channels);
        assert_eq!(records[0].value_len, LARGE_VALUE_SENTINEL);
        assert_eq!(records[1].inline_value(), Some(&b"s"[..]));
        let large = channels.large_values.try_dequeue().expect("large value");
        assert_eq!(large.as_slice(), &big[..]);
        assert!(channels.large_values.try_dequeue().is_none());
    }
}

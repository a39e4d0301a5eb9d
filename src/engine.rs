//! Trie engine collaborator interface.
//!
//! Workers call only `find` and `traverse`; `find_from` and the synchronous
//! methods are for callers that hold roots or mutate the trie. Read operations
//! are `async` so an engine that waits on I/O can suspend and let sibling
//! workers run on the same execution thread. Mutation and version management
//! are synchronous and are expected to be serialized by the caller outside the
//! pipeline.

use crate::error::EngineError;

/// A node handle returned by an engine.
pub trait TrieNode: Clone {
    /// Value stored at this node, if any.
    fn value(&self) -> Option<&[u8]>;

    /// Internal node data. For Merkle engines this is the 32-byte node hash.
    fn data(&self) -> &[u8];

    /// Compressed path segment owned by this node, one nibble per byte.
    fn path_nibbles(&self) -> &[u8];
}

/// Depth-first visitor driven by [`TrieEngine::traverse`].
///
/// `branch` is `None` for the node the traversal started from. Returning
/// `false` from `down` prunes that node's subtree; `up` is only called for
/// nodes whose `down` returned `true`.
pub trait TraverseVisitor<N> {
    fn down(&mut self, branch: Option<u8>, node: &N) -> bool;
    fn up(&mut self, branch: Option<u8>, node: &N);
}

/// One key/value change applied by [`TrieEngine::upsert`].
#[derive(Debug, Clone)]
pub struct Update {
    pub key: Vec<u8>,
    /// `None` deletes the key.
    pub value: Option<Vec<u8>>,
    /// Updates applied beneath `key`; their keys are relative to it.
    pub nested: Vec<Update>,
}

impl Update {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            nested: Vec::new(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            nested: Vec::new(),
        }
    }

    pub fn with_nested(mut self, nested: Vec<Update>) -> Self {
        self.nested = nested;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertFlags {
    /// Publish the resulting root as the root of `version`.
    pub write_root: bool,
}

impl Default for UpsertFlags {
    fn default() -> Self {
        Self { write_root: true }
    }
}

#[allow(async_fn_in_trait)]
pub trait TrieEngine: Send + Sync + 'static {
    type Node: TrieNode;

    /// Look up `key` in the root of `version`.
    async fn find(&self, key: &[u8], version: u64) -> Result<Option<Self::Node>, EngineError>;

    /// Look up `key` beneath an explicit root.
    async fn find_from(
        &self,
        root: &Self::Node,
        key: &[u8],
        version: u64,
    ) -> Result<Option<Self::Node>, EngineError>;

    /// Depth-first walk from `start`, children in ascending branch order.
    /// At most `limit` valued nodes are handed to the visitor.
    async fn traverse(
        &self,
        start: &Self::Node,
        visitor: &mut dyn TraverseVisitor<Self::Node>,
        version: u64,
        limit: usize,
    ) -> Result<(), EngineError>;

    /// Apply `updates` on top of `root`, returning the new root (`None` for an empty trie).
    fn upsert(
        &self,
        root: Option<&Self::Node>,
        updates: &[Update],
        version: u64,
        flags: UpsertFlags,
    ) -> Result<Option<Self::Node>, EngineError>;

    fn load_root_for_version(&self, version: u64) -> Result<Option<Self::Node>, EngineError>;

    fn latest_version(&self) -> Option<u64>;

    fn earliest_version(&self) -> Option<u64>;

    fn history_length(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_builders() {
        let u = Update::put("k", "v").with_nested(vec![Update::delete("n")]);
        assert_eq!(u.key, b"k");
        assert_eq!(u.value.as_deref(), Some(&b"v"[..]));
        assert_eq!(u.nested.len(), 1);
        assert!(u.nested[0].value.is_none());
        assert!(UpsertFlags::default().write_root);
    }
}

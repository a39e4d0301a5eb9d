//! In-memory versioned Merkle Patricia trie.
//!
//! Nodes are immutable and shared between versions (`Arc` copy-on-write), so
//! readers on the worker thread never contend with a writer publishing a new
//! version. Each node carries a SHA-256 digest over its path, value and child
//! digests as its 32-byte Merkle data. Only the newest `history_length`
//! versions stay queryable.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_HISTORY_LENGTH;
use crate::engine::{TraverseVisitor, TrieEngine, TrieNode, Update, UpsertFlags};
use crate::error::{EngineError, Error, Result};
use crate::protocol::bytes_to_nibbles;

const BRANCHES: usize = 16;

type Children = [Option<Arc<Node>>; BRANCHES];

fn no_children() -> Children {
    std::array::from_fn(|_| None)
}

struct Node {
    path: Vec<u8>,
    value: Option<Arc<[u8]>>,
    children: Children,
    hash: [u8; 32],
}

impl Node {
    fn new(path: Vec<u8>, value: Option<Arc<[u8]>>, children: Children) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((path.len() as u32).to_le_bytes());
        hasher.update(&path);
        match &value {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update((v.len() as u64).to_le_bytes());
                hasher.update(v);
            }
            None => hasher.update([0u8]),
        }
        for (branch, child) in children.iter().enumerate() {
            if let Some(child) = child {
                hasher.update([branch as u8]);
                hasher.update(child.hash);
            }
        }
        Self {
            path,
            value,
            children,
            hash: hasher.finalize().into(),
        }
    }

    /// Value-less position `offset` nibbles into this node's segment. Its one
    /// child is the remainder of this node.
    fn split_at(&self, offset: usize) -> Self {
        let tail = Node::new(
            self.path[offset + 1..].to_vec(),
            self.value.clone(),
            self.children.clone(),
        );
        let mut children = no_children();
        children[self.path[offset] as usize] = Some(Arc::new(tail));
        Node::new(self.path[..offset].to_vec(), None, children)
    }
}

/// Shared handle to an immutable trie node.
#[derive(Clone)]
pub struct NodeRef(Arc<Node>);

impl NodeRef {
    pub fn hash(&self) -> [u8; 32] {
        self.0.hash
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRef")
            .field("path", &self.0.path)
            .field("value_len", &self.0.value.as_ref().map(|v| v.len()))
            .finish()
    }
}

impl TrieNode for NodeRef {
    fn value(&self) -> Option<&[u8]> {
        self.0.value.as_deref()
    }

    fn data(&self) -> &[u8] {
        &self.0.hash
    }

    fn path_nibbles(&self) -> &[u8] {
        &self.0.path
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Rebuild a node after one of its parts changed, collapsing value-less nodes
/// with fewer than two children.
fn normalize(mut path: Vec<u8>, value: Option<Arc<[u8]>>, children: Children) -> Option<Arc<Node>> {
    if value.is_some() {
        return Some(Arc::new(Node::new(path, value, children)));
    }
    let mut live = children
        .iter()
        .enumerate()
        .filter_map(|(b, c)| c.as_ref().map(|c| (b, c)));
    match (live.next(), live.next()) {
        (None, _) => None,
        (Some((branch, only)), None) => {
            path.push(branch as u8);
            path.extend_from_slice(&only.path);
            Some(Arc::new(Node::new(
                path,
                only.value.clone(),
                only.children.clone(),
            )))
        }
        _ => Some(Arc::new(Node::new(path, None, children))),
    }
}

/// Persistent insert (`Some`) or delete (`None`) of `key` beneath `node`.
fn apply(node: Option<&Arc<Node>>, key: &[u8], value: Option<Arc<[u8]>>) -> Option<Arc<Node>> {
    let Some(node) = node else {
        return value.map(|v| Arc::new(Node::new(key.to_vec(), Some(v), no_children())));
    };

    let common = common_prefix(&node.path, key);
    if common < node.path.len() {
        // Key leaves this node's segment early: split it.
        let Some(value) = value else {
            return Some(Arc::clone(node));
        };
        let mut children = no_children();
        children[node.path[common] as usize] = Some(Arc::new(Node::new(
            node.path[common + 1..].to_vec(),
            node.value.clone(),
            node.children.clone(),
        )));
        let own_value = if common == key.len() {
            Some(value)
        } else {
            children[key[common] as usize] = Some(Arc::new(Node::new(
                key[common + 1..].to_vec(),
                Some(value),
                no_children(),
            )));
            None
        };
        return Some(Arc::new(Node::new(
            node.path[..common].to_vec(),
            own_value,
            children,
        )));
    }

    let rest = &key[common..];
    if rest.is_empty() {
        return normalize(node.path.clone(), value, node.children.clone());
    }
    let branch = rest[0] as usize;
    let mut children = node.children.clone();
    children[branch] = apply(node.children[branch].as_ref(), &rest[1..], value);
    normalize(node.path.clone(), node.value.clone(), children)
}

fn flatten(updates: &[Update], prefix: &[u8], out: &mut Vec<(Vec<u8>, Option<Arc<[u8]>>)>) {
    for update in updates {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&bytes_to_nibbles(&update.key));
        out.push((key.clone(), update.value.as_deref().map(Arc::from)));
        flatten(&update.nested, &key, out);
    }
}

enum Step {
    Enter(Option<u8>, NodeRef),
    Exit(Option<u8>, NodeRef),
}

/// Versioned in-memory trie engine.
pub struct MemoryTrie {
    roots: RwLock<BTreeMap<u64, Option<NodeRef>>>,
    history_length: u64,
    simulated_io: bool,
}

impl Default for MemoryTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTrie {
    pub fn new() -> Self {
        Self::with_history_length(DEFAULT_HISTORY_LENGTH)
    }

    /// Zero is treated as one retained version.
    pub fn with_history_length(history_length: u64) -> Self {
        Self {
            roots: RwLock::new(BTreeMap::new()),
            history_length: history_length.max(1),
            simulated_io: false,
        }
    }

    /// Yield to the scheduler once per node visited, as a disk-backed engine
    /// would while waiting on reads.
    pub fn with_simulated_io(mut self, enabled: bool) -> Self {
        self.simulated_io = enabled;
        self
    }

    /// Upsert on top of the latest root and publish the result as `version`.
    pub fn commit(&self, updates: &[Update], version: u64) -> Result<()> {
        let base = match self.latest_version() {
            Some(latest) => self.load_root_for_version(latest)?,
            None => None,
        };
        self.upsert(base.as_ref(), updates, version, UpsertFlags::default())?;
        Ok(())
    }

    pub fn version_is_valid(&self, version: u64) -> bool {
        self.roots.read().contains_key(&version)
    }

    /// Merkle root of `version`; the digest of an empty node for an empty trie.
    pub fn root_hash(&self, version: u64) -> Result<[u8; 32]> {
        let roots = self.roots.read();
        match roots.get(&version) {
            Some(Some(root)) => Ok(root.hash()),
            Some(None) => Ok(Node::new(Vec::new(), None, no_children()).hash),
            None => Err(Error::NotFound(format!("no root for version {version}"))),
        }
    }

    fn root_for(&self, version: u64) -> std::result::Result<Option<NodeRef>, EngineError> {
        let roots = self.roots.read();
        match roots.get(&version) {
            Some(root) => Ok(root.clone()),
            None => Err(EngineError::VersionOutOfRange {
                version,
                earliest: roots.keys().next().copied(),
                latest: roots.keys().next_back().copied(),
            }),
        }
    }

    async fn io_point(&self) {
        if self.simulated_io {
            tokio::task::yield_now().await;
        }
    }

    async fn lookup(&self, root: &NodeRef, key: &[u8]) -> Option<NodeRef> {
        let nibbles = bytes_to_nibbles(key);
        let mut node = Arc::clone(&root.0);
        let mut rest = &nibbles[..];
        loop {
            self.io_point().await;
            let common = common_prefix(&node.path, rest);
            if common < node.path.len() {
                if common == rest.len() {
                    return Some(NodeRef(Arc::new(node.split_at(common))));
                }
                return None;
            }
            rest = &rest[common..];
            let Some((&branch, tail)) = rest.split_first() else {
                return Some(NodeRef(node));
            };
            node = Arc::clone(node.children[branch as usize].as_ref()?);
            rest = tail;
        }
    }
}

impl TrieEngine for MemoryTrie {
    type Node = NodeRef;

    async fn find(&self, key: &[u8], version: u64) -> std::result::Result<Option<NodeRef>, EngineError> {
        match self.root_for(version)? {
            Some(root) => Ok(self.lookup(&root, key).await),
            None => Ok(None),
        }
    }

    async fn find_from(
        &self,
        root: &NodeRef,
        key: &[u8],
        _version: u64,
    ) -> std::result::Result<Option<NodeRef>, EngineError> {
        Ok(self.lookup(root, key).await)
    }

    async fn traverse(
        &self,
        start: &NodeRef,
        visitor: &mut dyn TraverseVisitor<NodeRef>,
        _version: u64,
        limit: usize,
    ) -> std::result::Result<(), EngineError> {
        let mut handed = 0usize;
        let mut stack = vec![Step::Enter(None, start.clone())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(branch, node) => {
                    if handed >= limit {
                        continue;
                    }
                    self.io_point().await;
                    if node.0.value.is_some() {
                        handed += 1;
                    }
                    if !visitor.down(branch, &node) {
                        continue;
                    }
                    stack.push(Step::Exit(branch, node.clone()));
                    for (b, child) in node.0.children.iter().enumerate().rev() {
                        if let Some(child) = child {
                            stack.push(Step::Enter(Some(b as u8), NodeRef(Arc::clone(child))));
                        }
                    }
                }
                Step::Exit(branch, node) => visitor.up(branch, &node),
            }
        }
        Ok(())
    }

    fn upsert(
        &self,
        root: Option<&NodeRef>,
        updates: &[Update],
        version: u64,
        flags: UpsertFlags,
    ) -> std::result::Result<Option<NodeRef>, EngineError> {
        let mut flat = Vec::new();
        flatten(updates, &[], &mut flat);

        let mut new_root = root.map(|r| Arc::clone(&r.0));
        for (key, value) in flat {
            new_root = apply(new_root.as_ref(), &key, value);
        }
        let new_root = new_root.map(NodeRef);

        if flags.write_root {
            let mut roots = self.roots.write();
            if let Some(&latest) = roots.keys().next_back() {
                if version.saturating_add(self.history_length) <= latest {
                    return Err(EngineError::VersionOutOfRange {
                        version,
                        earliest: roots.keys().next().copied(),
                        latest: Some(latest),
                    });
                }
            }
            roots.insert(version, new_root.clone());
            while roots.len() as u64 > self.history_length {
                roots.pop_first();
            }
        }
        Ok(new_root)
    }

    fn load_root_for_version(&self, version: u64) -> std::result::Result<Option<NodeRef>, EngineError> {
        Ok(self.roots.read().get(&version).cloned().flatten())
    }

    fn latest_version(&self) -> Option<u64> {
        self.roots.read().keys().next_back().copied()
    }

    fn earliest_version(&self) -> Option<u64> {
        self.roots.read().keys().next().copied()
    }

    fn history_length(&self) -> u64 {
        self.history_length
    }
}

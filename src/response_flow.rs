//! Response path: poll completion and traverse records, pair any sentinel
//! record with its LargeValue by user_data, and hand back owned results.
//!
//! A LargeValue is always posted before the record that points at it, so by
//! the time a sentinel record is polled its payload is already queued. A
//! `Collector` assumes it is the only consumer of the large-value channel.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::constants::SIDE_PAYLOAD_LEN;
use crate::engine::TrieEngine;
use crate::pipeline::Pipeline;
use crate::records::{Completion, ResultStatus};

/// Outcome of a FindValue/FindNode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub user_data: u128,
    pub status: ResultStatus,
    pub value: Vec<u8>,
    /// The value arrived on the large-value channel.
    pub has_large_value: bool,
    /// Node hash for FindNode hits; zero otherwise.
    pub merkle_hash: [u8; SIDE_PAYLOAD_LEN],
}

/// One record of a traversal stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraverseEvent {
    Item {
        user_data: u128,
        value: Vec<u8>,
        has_large_value: bool,
        /// Packed nibble path of the key (see `protocol::pack_path`).
        path: [u8; SIDE_PAYLOAD_LEN],
    },
    End {
        user_data: u128,
    },
}

impl TraverseEvent {
    pub fn user_data(&self) -> u128 {
        match *self {
            TraverseEvent::Item { user_data, .. } | TraverseEvent::End { user_data } => user_data,
        }
    }
}

pub struct Collector<'p, E: TrieEngine> {
    pipeline: &'p Pipeline<E>,
    large: HashMap<u128, VecDeque<Vec<u8>>>,
    batch: usize,
}

impl<'p, E: TrieEngine> Collector<'p, E> {
    pub fn new(pipeline: &'p Pipeline<E>) -> Self {
        Self::with_batch(pipeline, 256)
    }

    /// Records pulled from a channel per poll call.
    pub fn with_batch(pipeline: &'p Pipeline<E>, batch: usize) -> Self {
        Self {
            pipeline,
            large: HashMap::new(),
            batch: batch.max(1),
        }
    }

    /// Drain up to one batch of find completions into `out`; returns how many were added.
    pub fn poll_finds(&mut self, out: &mut Vec<FindResult>) -> usize {
        let comps = self.pipeline.poll_completion_batch(self.batch);
        let n = comps.len();
        for comp in comps {
            let user_data = comp.user_data();
            let (value, has_large_value) = self.value_of(&comp);
            out.push(FindResult {
                user_data,
                status: comp.status(),
                value,
                has_large_value,
                merkle_hash: comp.side_payload,
            });
            self.pipeline.release_completion(comp);
        }
        n
    }

    /// Drain up to one batch of traverse records into `out`; returns how many were added.
    pub fn poll_traversals(&mut self, out: &mut Vec<TraverseEvent>) -> usize {
        let comps = self.pipeline.poll_traverse_batch(self.batch);
        let n = comps.len();
        for comp in comps {
            let user_data = comp.user_data();
            let event = match comp.status() {
                ResultStatus::TraverseMore => {
                    let (value, has_large_value) = self.value_of(&comp);
                    TraverseEvent::Item {
                        user_data,
                        value,
                        has_large_value,
                        path: comp.side_payload,
                    }
                }
                _ => TraverseEvent::End { user_data },
            };
            out.push(event);
            self.pipeline.release_traverse(comp);
        }
        n
    }

    /// Payloads polled but not yet claimed by a record.
    pub fn pending_large_values(&self) -> usize {
        self.large.values().map(VecDeque::len).sum()
    }

    fn value_of(&mut self, comp: &Completion) -> (Vec<u8>, bool) {
        if let Some(inline) = comp.inline_value() {
            return (inline.to_vec(), false);
        }
        let user_data = comp.user_data();
        let value = self.take_large(user_data).unwrap_or_else(|| {
            warn!(user_data = %user_data, "sentinel record without a large value");
            Vec::new()
        });
        (value, true)
    }

    fn take_large(&mut self, user_data: u128) -> Option<Vec<u8>> {
        if let Some(v) = self.pop_large(user_data) {
            return Some(v);
        }
        loop {
            let batch = self.pipeline.poll_large_value_batch(self.batch);
            if batch.is_empty() {
                return None;
            }
            for lv in batch {
                let mut lv = *lv;
                lv.data.truncate(lv.len as usize);
                self.large
                    .entry(lv.user_data())
                    .or_default()
                    .push_back(lv.data);
            }
            if let Some(v) = self.pop_large(user_data) {
                return Some(v);
            }
        }
    }

    fn pop_large(&mut self, user_data: u128) -> Option<Vec<u8>> {
        let queue = self.large.get_mut(&user_data)?;
        let v = queue.pop_front();
        if queue.is_empty() {
            self.large.remove(&user_data);
        }
        v
    }
}

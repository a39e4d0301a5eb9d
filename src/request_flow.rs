//! Submission helpers: populate request slots and hand them to a pipeline.
//!
//! Everything here goes through the same alloc → fill → submit path a foreign
//! caller uses with raw request slots.

use crate::engine::TrieEngine;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::records::{Request, RequestType};

fn prepare<E: TrieEngine>(
    pipeline: &Pipeline<E>,
    op: RequestType,
    key: &[u8],
    version: u64,
    traverse_limit: u32,
    user_data: u128,
) -> Result<Box<Request>> {
    let mut req = pipeline.alloc_request()?;
    req.fill(op, key, version, traverse_limit, user_data)?;
    Ok(req)
}

pub fn submit_find_value<E: TrieEngine>(
    pipeline: &Pipeline<E>,
    key: &[u8],
    version: u64,
    user_data: u128,
) -> Result<()> {
    pipeline.submit(prepare(pipeline, RequestType::FindValue, key, version, 0, user_data)?)
}

/// Like [`submit_find_value`], and the completion also carries the node's 32-byte hash.
pub fn submit_find_node<E: TrieEngine>(
    pipeline: &Pipeline<E>,
    key: &[u8],
    version: u64,
    user_data: u128,
) -> Result<()> {
    pipeline.submit(prepare(pipeline, RequestType::FindNode, key, version, 0, user_data)?)
}

/// Walk every valued key under `prefix`. A `limit` of 0 means the default.
pub fn submit_traverse<E: TrieEngine>(
    pipeline: &Pipeline<E>,
    prefix: &[u8],
    version: u64,
    limit: u32,
    user_data: u128,
) -> Result<()> {
    pipeline.submit(prepare(
        pipeline,
        RequestType::Traverse,
        prefix,
        version,
        limit,
        user_data,
    )?)
}

/// Submit a batch of FindValue requests given as `(key, version, user_data)`.
///
/// Every slot is allocated and populated before anything is enqueued, so an
/// error (oversized key, allocation failure) submits nothing.
pub fn submit_find_batch<E: TrieEngine>(
    pipeline: &Pipeline<E>,
    finds: &[(&[u8], u64, u128)],
) -> Result<usize> {
    let mut slots = pipeline.alloc_request_batch(finds.len())?;
    for (slot, &(key, version, user_data)) in slots.iter_mut().zip(finds) {
        slot.fill(RequestType::FindValue, key, version, 0, user_data)?;
    }
    Ok(pipeline.submit_batch(slots))
}

//! Library crate for trie-fifo: a non-blocking request/completion pipeline
//! over a versioned Merkle Patricia trie.
//!
//! Callers on any thread allocate request records, submit them, and poll
//! completion, traverse and large-value channels. A pool of cooperatively
//! scheduled workers on one dedicated thread executes the requests against a
//! [`engine::TrieEngine`]. The binary (`main.rs`) is a stress driver over the
//! in-memory engine.

pub mod alloc;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod memory_trie;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod records;
pub mod request_flow;
pub mod response_flow;
mod traverse;
mod worker;

pub use error::{EngineError, Error, Result};
pub use pipeline::{Pipeline, PipelineStats};
pub use records::{Completion, LargeValue, Request, RequestType, ResultStatus};

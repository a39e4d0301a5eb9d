//! Error types for the request/completion pipeline and its trie engine.
//!
//! `Error` is what callers of the pipeline see. `EngineError` is what the trie
//! engine collaborator reports; workers never surface it directly, they map it
//! to a `ResultStatus` on the completion record.

use thiserror::Error;

/// Caller-facing error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    /// A required input was absent (e.g. a request slot submitted without an operation).
    #[error("missing argument: {0}")]
    NullArgument(&'static str),

    /// An input was present but malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying I/O failure (thread spawn, engine storage).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Version outside the engine's retained history window.
    #[error("version {version} outside retained range {earliest:?}..={latest:?}")]
    VersionOutOfRange {
        version: u64,
        earliest: Option<u64>,
        latest: Option<u64>,
    },

    /// Operation not supported by this engine or mode.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A record or payload allocation failed.
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    /// Invariant violation or unexpected engine failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors reported by a trie engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("version {version} outside retained range {earliest:?}..={latest:?}")]
    VersionOutOfRange {
        version: u64,
        earliest: Option<u64>,
        latest: Option<u64>,
    },

    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::VersionOutOfRange {
                version,
                earliest,
                latest,
            } => Error::VersionOutOfRange {
                version,
                earliest,
                latest,
            },
            EngineError::NotSupported(what) => Error::NotSupported(what),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

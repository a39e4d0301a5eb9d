//! Fallible allocation for records and large-value payloads.
//!
//! Every record travelling through a channel is one heap allocation made by
//! its producer and released by its consumer. Allocation failure is reported
//! to the caller instead of aborting the process, so the pipeline can count
//! and log the record it had to drop.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::Zeroable;

use crate::error::Error;
use crate::metrics;

/// Error returned when a record or payload cannot be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Fixed-size record allocation failed.
    Record { bytes: usize },
    /// Payload buffer allocation failed.
    Payload { requested: usize },
    /// Payload length cannot be described by a 32-bit length field.
    TooLarge { requested: usize, capacity: usize },
}

impl AllocError {
    pub fn bytes(&self) -> usize {
        match *self {
            AllocError::Record { bytes } => bytes,
            AllocError::Payload { requested } | AllocError::TooLarge { requested, .. } => {
                requested
            }
        }
    }
}

impl From<AllocError> for Error {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::TooLarge {
                requested,
                capacity,
            } => Error::InvalidArgument(format!(
                "payload of {requested} bytes exceeds {capacity}-byte limit"
            )),
            other => Error::OutOfMemory {
                bytes: other.bytes(),
            },
        }
    }
}

/// Allocator for channel records.
#[derive(Default)]
pub struct RecordAllocator {
    #[cfg(test)]
    fail_next: AtomicUsize,
}

impl RecordAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed record on the heap.
    pub fn record<T: Zeroable>(&self) -> Result<Box<T>, AllocError> {
        let bytes = std::mem::size_of::<T>();
        self.injected_failure(AllocError::Record { bytes })?;
        bytemuck::allocation::try_zeroed_box::<T>().map_err(|()| {
            metrics::inc_alloc_failed();
            AllocError::Record { bytes }
        })
    }

    /// Copy `src` into a freshly reserved buffer of exactly its length.
    pub fn payload(&self, src: &[u8]) -> Result<Vec<u8>, AllocError> {
        let capacity = u32::MAX as usize;
        if src.len() > capacity {
            return Err(AllocError::TooLarge {
                requested: src.len(),
                capacity,
            });
        }
        self.injected_failure(AllocError::Payload {
            requested: src.len(),
        })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(src.len()).map_err(|_| {
            metrics::inc_alloc_failed();
            AllocError::Payload {
                requested: src.len(),
            }
        })?;
        buf.extend_from_slice(src);
        Ok(buf)
    }

    /// Make the next `n` allocations fail.
    #[cfg(test)]
    pub(crate) fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::Release);
    }

    #[cfg(test)]
    fn injected_failure(&self, err: AllocError) -> Result<(), AllocError> {
        let armed = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match armed {
            Ok(_) => Err(err),
            Err(_) => Ok(()),
        }
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn injected_failure(&self, _err: AllocError) -> Result<(), AllocError> {
        Ok(())
    }
}

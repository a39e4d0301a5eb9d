//! Fixed-size records carried by the pipeline channels.
//!
//! `Request` and `Completion` are plain-old-data with a stable `repr(C)` layout
//! (64 and 312 bytes) so foreign callers can fill and read them in place.
//! `LargeValue` carries a variable-length payload and only exists for values
//! that do not fit inline.

use bytemuck::{Pod, Zeroable};

use crate::constants::{
    DEFAULT_TRAVERSE_LIMIT, INLINE_VALUE_CAPACITY, LARGE_VALUE_SENTINEL, MAX_KEY_LEN,
    SIDE_PAYLOAD_LEN,
};
use crate::error::{Error, Result};
use crate::protocol::{combine_user_data, split_user_data};

const _: () = assert!(std::mem::size_of::<Request>() == 64, "Request layout changed");
const _: () = assert!(
    std::mem::size_of::<Completion>() == 312,
    "Completion layout changed"
);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    FindValue = 1,
    FindNode = 2,
    Traverse = 3,
    /// Worker exit sentinel. Only the pipeline itself may enqueue it.
    Shutdown = 255,
}

impl TryFrom<u8> for RequestType {
    type Error = u8;

    fn try_from(v: u8) -> std::result::Result<Self, u8> {
        match v {
            1 => Ok(Self::FindValue),
            2 => Ok(Self::FindNode),
            3 => Ok(Self::Traverse),
            255 => Ok(Self::Shutdown),
            other => Err(other),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Ok = 0,
    NotFound = 1,
    Error = 2,
    TraverseMore = 3,
    TraverseEnd = 4,
}

impl From<u8> for ResultStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Ok,
            1 => Self::NotFound,
            3 => Self::TraverseMore,
            4 => Self::TraverseEnd,
            _ => Self::Error,
        }
    }
}

/// Request record. Immutable once submitted.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Request {
    pub user_data_lo: u64,
    pub user_data_hi: u64,
    pub version: u64,
    pub op: u8,
    pub key_len: u8,
    pub _pad: [u8; 2],
    pub traverse_limit: u32,
    pub key: [u8; MAX_KEY_LEN],
}

impl Request {
    /// Populate a (zeroed) slot. Keys longer than `MAX_KEY_LEN` are rejected.
    pub fn fill(
        &mut self,
        op: RequestType,
        key: &[u8],
        version: u64,
        traverse_limit: u32,
        user_data: u128,
    ) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidArgument(format!(
                "key is {} bytes, at most {MAX_KEY_LEN} fit in a request",
                key.len()
            )));
        }
        let (lo, hi) = split_user_data(user_data);
        self.user_data_lo = lo;
        self.user_data_hi = hi;
        self.version = version;
        self.op = op as u8;
        self.key_len = key.len() as u8;
        self.traverse_limit = traverse_limit;
        self.key = [0u8; MAX_KEY_LEN];
        self.key[..key.len()].copy_from_slice(key);
        Ok(())
    }

    /// Shutdown sentinel tagged with the pool generation it belongs to.
    pub fn shutdown(generation: u64) -> Self {
        let mut req = Self::zeroed();
        req.op = RequestType::Shutdown as u8;
        req.version = generation;
        req
    }

    pub fn op(&self) -> Option<RequestType> {
        RequestType::try_from(self.op).ok()
    }

    pub fn user_data(&self) -> u128 {
        combine_user_data(self.user_data_lo, self.user_data_hi)
    }

    pub fn key(&self) -> &[u8] {
        &self.key[..(self.key_len as usize).min(MAX_KEY_LEN)]
    }

    /// Traverse limit with zero mapped to the default.
    pub fn effective_traverse_limit(&self) -> u32 {
        if self.traverse_limit == 0 {
            DEFAULT_TRAVERSE_LIMIT
        } else {
            self.traverse_limit
        }
    }
}

/// Completion record, shared by the completion and traverse channels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Completion {
    pub user_data_lo: u64,
    pub user_data_hi: u64,
    pub status: u8,
    pub _pad: [u8; 3],
    /// Inline length, or `LARGE_VALUE_SENTINEL`.
    pub value_len: u32,
    pub value: [u8; INLINE_VALUE_CAPACITY],
    pub side_payload: [u8; SIDE_PAYLOAD_LEN],
}

impl Completion {
    pub fn new(user_data: u128, status: ResultStatus) -> Self {
        let mut comp = Self::zeroed();
        comp.set_header(user_data, status);
        comp
    }

    /// Overwrite user_data and status, leaving the rest of the record alone.
    pub fn set_header(&mut self, user_data: u128, status: ResultStatus) {
        let (lo, hi) = split_user_data(user_data);
        self.user_data_lo = lo;
        self.user_data_hi = hi;
        self.status = status as u8;
    }

    pub fn user_data(&self) -> u128 {
        combine_user_data(self.user_data_lo, self.user_data_hi)
    }

    pub fn status(&self) -> ResultStatus {
        ResultStatus::from(self.status)
    }

    /// Copy `value` inline. Returns false (record untouched) when it does not fit.
    pub fn set_inline_value(&mut self, value: &[u8]) -> bool {
        if value.len() > INLINE_VALUE_CAPACITY {
            return false;
        }
        self.value[..value.len()].copy_from_slice(value);
        self.value_len = value.len() as u32;
        true
    }

    pub fn mark_large_value(&mut self) {
        self.value_len = LARGE_VALUE_SENTINEL;
    }

    pub fn has_large_value(&self) -> bool {
        self.value_len == LARGE_VALUE_SENTINEL
    }

    /// Inline value bytes; `None` when the value went to the large-value channel.
    pub fn inline_value(&self) -> Option<&[u8]> {
        if self.has_large_value() {
            return None;
        }
        Some(&self.value[..(self.value_len as usize).min(INLINE_VALUE_CAPACITY)])
    }
}

/// Out-of-line value for a completion whose `value_len` is the sentinel.
#[derive(Debug, Clone)]
pub struct LargeValue {
    pub user_data_lo: u64,
    pub user_data_hi: u64,
    pub len: u32,
    pub data: Vec<u8>,
}

impl LargeValue {
    pub fn user_data(&self) -> u128 {
        combine_user_data(self.user_data_lo, self.user_data_hi)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_populates_every_field() {
        let mut req = Request::zeroed();
        req.fill(RequestType::Traverse, b"abc", 7, 2, (9u128 << 64) | 3)
            .expect("fill");
        assert_eq!(req.op(), Some(RequestType::Traverse));
        assert_eq!(req.key(), b"abc");
        assert_eq!(req.version, 7);
        assert_eq!(req.traverse_limit, 2);
        assert_eq!(req.user_data_lo, 3);
        assert_eq!(req.user_data_hi, 9);
        assert_eq!(req.user_data(), (9u128 << 64) | 3);
    }

    #[test]
    fn fill_rejects_oversized_key() {
        let mut req = Request::zeroed();
        let key = [1u8; MAX_KEY_LEN + 1];
        let err = req
            .fill(RequestType::FindValue, &key, 1, 0, 1)
            .expect_err("key too long");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(req.op(), None, "slot must stay unpopulated");
    }

    #[test]
    fn refill_clears_previous_key_bytes() {
        let mut req = Request::zeroed();
        req.fill(RequestType::FindValue, b"longer-key", 1, 0, 1)
            .expect("fill");
        req.fill(RequestType::FindValue, b"k", 1, 0, 1).expect("fill");
        assert_eq!(req.key(), b"k");
        assert!(req.key[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_traverse_limit_uses_default() {
        let mut req = Request::zeroed();
        req.fill(RequestType::Traverse, b"", 1, 0, 0).expect("fill");
        assert_eq!(req.effective_traverse_limit(), DEFAULT_TRAVERSE_LIMIT);
    }

    #[test]
    fn shutdown_sentinel_carries_generation() {
        let req = Request::shutdown(42);
        assert_eq!(req.op(), Some(RequestType::Shutdown));
        assert_eq!(req.version, 42);
    }

    #[test]
    fn unknown_status_byte_reads_as_error() {
        assert_eq!(ResultStatus::from(200), ResultStatus::Error);
        assert_eq!(ResultStatus::from(4), ResultStatus::TraverseEnd);
    }

    #[test]
    fn inline_value_round_trips_and_sentinel_hides_it() {
        let mut comp = Completion::new(5, ResultStatus::Ok);
        assert!(comp.set_inline_value(b"100"));
        assert_eq!(comp.inline_value(), Some(&b"100"[..]));

        comp.mark_large_value();
        assert!(comp.has_large_value());
        assert_eq!(comp.inline_value(), None);
    }

    #[test]
    fn inline_value_accepts_exact_capacity_only() {
        let mut comp = Completion::new(1, ResultStatus::Ok);
        assert!(comp.set_inline_value(&[7u8; INLINE_VALUE_CAPACITY]));
        assert_eq!(comp.value_len as usize, INLINE_VALUE_CAPACITY);
        assert!(!comp.set_inline_value(&[7u8; INLINE_VALUE_CAPACITY + 1]));
    }

    #[test]
    fn records_are_viewable_as_bytes() {
        let req = Request::shutdown(1);
        assert_eq!(bytemuck::bytes_of(&req).len(), 64);
        let comp = Completion::new(1, ResultStatus::NotFound);
        assert_eq!(bytemuck::bytes_of(&comp)[16], ResultStatus::NotFound as u8);
    }
}

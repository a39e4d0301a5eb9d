/// Inline key capacity of a request record (bytes).
pub const MAX_KEY_LEN: usize = 32;

/// Inline value capacity of a completion record (bytes). Longer values travel
/// on the large-value channel.
pub const INLINE_VALUE_CAPACITY: usize = 256;

/// Side payload: Merkle data for FindNode, packed key path for Traverse.
pub const SIDE_PAYLOAD_LEN: usize = 32;

/// `value_len` sentinel meaning "see the large-value channel".
pub const LARGE_VALUE_SENTINEL: u32 = u32::MAX;

/// Traverse result limit applied when a request leaves it at zero.
pub const DEFAULT_TRAVERSE_LIMIT: u32 = 4096;

/// Written to the last side-payload byte when a traversal path did not fit.
pub const PATH_TRUNCATED_MARKER: u8 = 0xFF;

/// Nibbles that fit in the side payload.
pub const MAX_PATH_NIBBLES: usize = SIDE_PAYLOAD_LEN * 2;

const _: () = assert!(MAX_KEY_LEN <= u8::MAX as usize, "key_len is u8");
const _: () = assert!(
    INLINE_VALUE_CAPACITY < LARGE_VALUE_SENTINEL as usize,
    "inline length must never collide with the sentinel"
);

use crate::constants::{MAX_PATH_NIBBLES, PATH_TRUNCATED_MARKER, SIDE_PAYLOAD_LEN};

/// Split a 128-bit user_data token into (lo, hi) little-endian halves.
#[inline]
pub fn split_user_data(user_data: u128) -> (u64, u64) {
    (user_data as u64, (user_data >> 64) as u64)
}

#[inline]
pub fn combine_user_data(lo: u64, hi: u64) -> u128 {
    ((hi as u128) << 64) | lo as u128
}

/// Expand key bytes to one nibble per byte, high nibble first.
pub fn bytes_to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(b >> 4);
        out.push(b & 0x0F);
    }
    out
}

/// Pack a nibble path into a side payload.
///
/// Paths of up to `MAX_PATH_NIBBLES` nibbles are packed exactly (an odd
/// trailing nibble occupies the high half of its byte). Longer paths keep
/// their first 32 bytes and have the last byte overwritten with
/// `PATH_TRUNCATED_MARKER`.
pub fn pack_path(nibbles: &[u8]) -> [u8; SIDE_PAYLOAD_LEN] {
    let mut out = [0u8; SIDE_PAYLOAD_LEN];
    let truncated = nibbles.len() > MAX_PATH_NIBBLES;
    for (i, &nibble) in nibbles.iter().take(MAX_PATH_NIBBLES).enumerate() {
        if i % 2 == 0 {
            out[i / 2] = nibble << 4;
        } else {
            out[i / 2] |= nibble & 0x0F;
        }
    }
    if truncated {
        out[SIDE_PAYLOAD_LEN - 1] = PATH_TRUNCATED_MARKER;
    }
    out
}

/// Whether a packed path was truncated. Only meaningful for paths the caller
/// knows may exceed 32 bytes; an exact 32-byte key ending in 0xFF looks the same.
pub fn path_truncated(packed: &[u8; SIDE_PAYLOAD_LEN]) -> bool {
    packed[SIDE_PAYLOAD_LEN - 1] == PATH_TRUNCATED_MARKER
}

//! Unsigned LEB128 varints and zigzag mapping
//!
//! Varints use the low seven bits of each byte for payload and the high bit as
//! a continuation flag, least significant group first. A `u64` needs at most
//! ten bytes.

use thiserror::Error;

/// Maximum encoded length of a `u64` varint
pub const MAX_VARINT_LEN: usize = 10;

/// Errors raised while decoding a varint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// Input ended before the terminating byte
    #[error("Truncated varint at byte {offset}")]
    Truncated {
        /// Byte position where the varint started
        offset: usize,
    },

    /// More than ten bytes, or a tenth byte with bits beyond 64
    #[error("Varint overflows u64 at byte {offset}")]
    Overflow {
        /// Byte position where the varint started
        offset: usize,
    },
}

/// Append `value` as an unsigned varint
pub fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes [`put_uvarint`] emits for `value`
pub const fn uvarint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode an unsigned varint starting at `offset`
///
/// Returns the value and the number of bytes consumed.
pub fn read_uvarint(data: &[u8], offset: usize) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = data.get(offset + i) else {
            return Err(VarintError::Truncated { offset });
        };

        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(VarintError::Overflow { offset });
        }

        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(VarintError::Overflow { offset })
}

/// Map a signed value onto the unsigned line: 0, -1, 1, -2, 2, ...
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`]
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

//! Unsigned LEB128 varints and length-prefixed blocks.
//!
//! Every byte carries 7 data bits, least significant group first; the high
//! bit is set on all bytes except the last. A `u64` takes at most 10 bytes.

use crate::error::{CodecError, CodecResult};

/// Maximum encoded length of a `u64`.
pub const MAX_LEN_U64: usize = 10;

/// Appends the varint encoding of `value` to `buf`.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Encodes `value` into a fresh buffer.
#[must_use]
pub fn pack_u64(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_LEN_U64);
    put_uvarint(&mut buf, value);
    buf
}

/// Decodes a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn uvarint(data: &[u8]) -> CodecResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_LEN_U64 {
            return Err(CodecError::malformed("varint overflows 64 bits"));
        }
        if i == MAX_LEN_U64 - 1 && byte > 1 {
            return Err(CodecError::malformed("varint overflows 64 bits"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(CodecError::UnexpectedEof)
}

/// Encodes a `u8` as a varint (one or two bytes).
#[must_use]
pub fn pack8(value: u8) -> Vec<u8> {
    pack_u64(u64::from(value))
}

/// Decodes a varint that must fit into a `u8`.
pub fn unpack8(data: &[u8]) -> CodecResult<(u8, usize)> {
    let (value, n) = uvarint(data)?;
    let value = u8::try_from(value)
        .map_err(|_| CodecError::malformed(format!("varint {value} does not fit into u8")))?;
    Ok((value, n))
}

/// Appends `block` prefixed with its varint length.
pub fn append_block(buf: &mut Vec<u8>, block: &[u8]) {
    put_uvarint(buf, block.len() as u64);
    buf.extend_from_slice(block);
}

/// Reads a length-prefixed block from the front of `data`.
///
/// Returns the block and the total number of bytes consumed.
pub fn next_block(data: &[u8]) -> CodecResult<(&[u8], usize)> {
    let (len, n) = uvarint(data)?;
    let len = usize::try_from(len).map_err(|_| CodecError::malformed("block too large"))?;
    let end = n
        .checked_add(len)
        .ok_or_else(|| CodecError::malformed("block too large"))?;
    if end > data.len() {
        return Err(CodecError::UnexpectedEof);
    }
    Ok((&data[n..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_values_take_one_byte() {
        assert_eq!(pack_u64(0), vec![0]);
        assert_eq!(pack_u64(1), vec![1]);
        assert_eq!(pack_u64(127), vec![0x7f]);
    }

    #[test]
    fn known_encodings() {
        assert_eq!(pack_u64(128), vec![0x80, 0x01]);
        assert_eq!(pack_u64(300), vec![0xac, 0x02]);
        assert_eq!(pack_u64(u64::MAX).len(), MAX_LEN_U64);
    }

    #[test]
    fn truncated_varint_fails() {
        assert_eq!(uvarint(&[0x80]), Err(CodecError::UnexpectedEof));
        assert_eq!(uvarint(&[]), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn overlong_varint_fails() {
        let data = [0xff; 11];
        assert!(matches!(uvarint(&data), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn unpack8_rejects_large_values() {
        let data = pack_u64(256);
        assert!(unpack8(&data).is_err());
        assert_eq!(unpack8(&pack8(255)).unwrap(), (255, 2));
    }

    #[test]
    fn block_framing() {
        let mut buf = Vec::new();
        append_block(&mut buf, b"hello");
        append_block(&mut buf, b"");
        buf.extend_from_slice(b"rest");

        let (first, n) = next_block(&buf).unwrap();
        assert_eq!(first, b"hello");
        let (second, m) = next_block(&buf[n..]).unwrap();
        assert!(second.is_empty());
        assert_eq!(&buf[n + m..], b"rest");
    }

    #[test]
    fn block_past_end_fails() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 10);
        buf.extend_from_slice(b"short");
        assert_eq!(next_block(&buf), Err(CodecError::UnexpectedEof));
    }

    proptest! {
        #[test]
        fn any_u64_decodes_to_itself(value in any::<u64>()) {
            let packed = pack_u64(value);
            prop_assert_eq!(uvarint(&packed).unwrap(), (value, packed.len()));
        }
    }
}

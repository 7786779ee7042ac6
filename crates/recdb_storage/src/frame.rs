//! Log frame layout.
//!
//! ```text
//! | frame_len: u32 | kind: u8 | key_len: u32 | key | value | crc32: u32 |
//! ```
//!
//! All integers are little-endian. `frame_len` counts the whole frame,
//! itself and the checksum included. The checksum covers every byte before
//! it.

use crate::error::{StorageError, StorageResult};

/// What a frame does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Sets the key to the frame's value.
    Put,
    /// Removes the key.
    Remove,
}

impl FrameKind {
    const fn as_byte(self) -> u8 {
        match self {
            FrameKind::Put => 1,
            FrameKind::Remove => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::Put),
            2 => Some(FrameKind::Remove),
            _ => None,
        }
    }
}

/// A single log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes, empty for removals.
    pub value: Vec<u8>,
}

impl Frame {
    /// `frame_len` + `kind` + `key_len`.
    pub const HEADER_SIZE: usize = 9;
    /// Trailing checksum.
    pub const CRC_SIZE: usize = 4;

    /// Creates a put frame.
    #[must_use]
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self {
            kind: FrameKind::Put,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Creates a remove frame.
    #[must_use]
    pub fn remove(key: &[u8]) -> Self {
        Self {
            kind: FrameKind::Remove,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    /// Total encoded size.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.key.len() + self.value.len() + Self::CRC_SIZE
    }

    /// Offset of the value relative to the frame start.
    #[must_use]
    pub fn value_offset(&self) -> usize {
        Self::HEADER_SIZE + self.key.len()
    }

    /// Encodes the frame.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let frame_len = self.encoded_size();
        let frame_len_u32 =
            u32::try_from(frame_len).map_err(|_| StorageError::TooLarge { size: frame_len })?;
        let mut buf = Vec::with_capacity(frame_len);

        buf.extend_from_slice(&frame_len_u32.to_le_bytes());
        buf.push(self.kind.as_byte());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Reads the declared length of the frame at the front of `data`.
    #[must_use]
    pub fn peek_len(data: &[u8]) -> Option<usize> {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes) as usize)
    }

    /// Decodes the frame at the front of `data`.
    ///
    /// `offset` is only used in error messages.
    pub fn decode(data: &[u8], offset: u64) -> StorageResult<Self> {
        let frame_len = Self::peek_len(data)
            .ok_or_else(|| StorageError::corrupted(offset, "truncated frame header"))?;
        if frame_len < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(StorageError::corrupted(offset, "frame length too small"));
        }
        if data.len() < frame_len {
            return Err(StorageError::corrupted(offset, "incomplete frame"));
        }

        let body = &data[..frame_len - Self::CRC_SIZE];
        let stored = u32::from_le_bytes([
            data[frame_len - 4],
            data[frame_len - 3],
            data[frame_len - 2],
            data[frame_len - 1],
        ]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(StorageError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let kind = FrameKind::from_byte(data[4])
            .ok_or_else(|| StorageError::corrupted(offset, format!("unknown frame kind {}", data[4])))?;
        let key_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        let key_end = Self::HEADER_SIZE
            .checked_add(key_len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| StorageError::corrupted(offset, "key length exceeds frame"))?;

        Ok(Self {
            kind,
            key: body[Self::HEADER_SIZE..key_end].to_vec(),
            value: body[key_end..].to_vec(),
        })
    }
}

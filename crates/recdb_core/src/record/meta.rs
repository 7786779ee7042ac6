//! Record metadata.

use recdb_codec::{Codable, CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Encoded size of [`Meta`] in the fixed-size layout.
pub const GENCODE_SIZE: usize = 34;

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Timestamps and access flags attached to every stored record.
///
/// All timestamps are Unix seconds; zero means unset. A negative `deleted`
/// value is not a deletion: it holds a relative expiry in seconds that the
/// next [`Meta::update`] turns into an absolute `expires`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// When the record was first written.
    pub created: i64,
    /// When the record was last written.
    pub modified: i64,
    /// When the record stops being valid.
    pub expires: i64,
    /// When the record was deleted, or a negated relative expiry.
    pub deleted: i64,
    secret: bool,
    crownjewel: bool,
}

impl Meta {
    /// Stamps a write: sets `modified`, fills `created` on first write and
    /// applies a pending relative expiry.
    pub fn update(&mut self) {
        self.update_at(unix_now());
    }

    pub(crate) fn update_at(&mut self, now: i64) {
        self.modified = now;
        if self.created == 0 {
            self.created = now;
        }
        if self.deleted < 0 {
            self.expires = now - self.deleted;
        }
    }

    /// Clears every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sets an absolute expiry and drops any relative one.
    pub fn set_absolute_expiry(&mut self, seconds: i64) {
        self.expires = seconds;
        self.deleted = 0;
    }

    /// Sets an expiry relative to the next write. Negative values are
    /// ignored.
    pub fn set_relative_expiry(&mut self, seconds: i64) {
        if seconds >= 0 {
            self.deleted = -seconds;
        }
    }

    /// Absolute expiry, zero if none.
    #[must_use]
    pub const fn absolute_expiry(&self) -> i64 {
        self.expires
    }

    /// Relative expiry in seconds, zero if none.
    #[must_use]
    pub const fn relative_expiry(&self) -> i64 {
        if self.deleted < 0 {
            -self.deleted
        } else {
            0
        }
    }

    /// Marks the record as readable only by internal callers.
    pub fn make_secret(&mut self) {
        self.secret = true;
    }

    /// Marks the record as readable only by local callers.
    pub fn make_crown_jewel(&mut self) {
        self.crownjewel = true;
    }

    /// Whether the record is secret.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        self.secret
    }

    /// Whether the record is a crown jewel.
    #[must_use]
    pub const fn is_crown_jewel(&self) -> bool {
        self.crownjewel
    }

    /// Marks the record as deleted now.
    pub fn delete(&mut self) {
        self.deleted = unix_now();
    }

    /// Whether the record is a tombstone.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted > 0
    }

    /// Whether the record was never modified after creation.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.created == self.modified
    }

    /// Whether the record is neither deleted nor expired.
    #[must_use]
    pub fn check_validity(&self) -> bool {
        self.is_valid_at(unix_now())
    }

    pub(crate) const fn is_valid_at(&self, now: i64) -> bool {
        if self.deleted > 0 {
            return false;
        }
        !(self.expires > 0 && self.expires < now)
    }

    /// Whether a caller with the given scope may see the record.
    ///
    /// Crown jewels require `local`, secrets require `internal`.
    #[must_use]
    pub const fn check_permission(&self, local: bool, internal: bool) -> bool {
        if !local && self.crownjewel {
            return false;
        }
        if !internal && self.secret {
            return false;
        }
        true
    }

    /// Encodes into the fixed 34-byte layout.
    #[must_use]
    pub fn to_gencode(&self) -> [u8; GENCODE_SIZE] {
        let mut buf = [0u8; GENCODE_SIZE];
        buf[0..8].copy_from_slice(&self.created.to_le_bytes());
        buf[8..16].copy_from_slice(&self.modified.to_le_bytes());
        buf[16..24].copy_from_slice(&self.expires.to_le_bytes());
        buf[24..32].copy_from_slice(&self.deleted.to_le_bytes());
        buf[32] = u8::from(self.secret);
        buf[33] = u8::from(self.crownjewel);
        buf
    }

    /// Decodes the fixed 34-byte layout. Trailing bytes are ignored.
    pub fn from_gencode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < GENCODE_SIZE {
            return Err(CodecError::malformed(format!(
                "metadata needs {GENCODE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let i64_at = |offset: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset..offset + 8]);
            i64::from_le_bytes(bytes)
        };
        Ok(Self {
            created: i64_at(0),
            modified: i64_at(8),
            expires: i64_at(16),
            deleted: i64_at(24),
            secret: data[32] == 1,
            crownjewel: data[33] == 1,
        })
    }
}

impl Codable for Meta {
    fn gencode_marshal(&self) -> Option<Vec<u8>> {
        Some(self.to_gencode().to_vec())
    }

    fn gencode_unmarshal(data: &[u8]) -> Option<CodecResult<Self>> {
        Some(Self::from_gencode(data))
    }
}

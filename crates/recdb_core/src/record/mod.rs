//! Records, their metadata and the binary envelope.
//!
//! A record is anything implementing [`Record`]. Two variants ship with the
//! crate:
//!
//! - [`Wrapper`] holds undecoded payload bytes plus their format; backends
//!   hand these out so nothing is decoded until someone needs the data
//! - [`TypedRecord`] holds a typed value encoded through the codec
//!
//! Records are shared between the cache, controllers and subscribers as
//! [`SharedRecord`]. Every read or mutation goes through its lock.

mod base;
pub mod envelope;
mod meta;
mod typed;
mod wrapper;

pub use base::Base;
pub use envelope::Envelope;
pub use meta::{unix_now, Meta, GENCODE_SIZE};
pub use typed::TypedRecord;
pub use wrapper::Wrapper;

use crate::accessor::Accessor;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use recdb_codec::Format;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A record behind its exclusive lock.
pub type SharedRecord = Arc<Mutex<dyn Record>>;

/// Wraps a record for sharing.
pub fn share<R: Record>(record: R) -> SharedRecord {
    Arc::new(Mutex::new(record))
}

/// Splits `name:key` at the first colon. Without a colon the whole string
/// is the name and the key is empty.
#[must_use]
pub fn parse_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}

/// Capabilities every stored record provides.
pub trait Record: fmt::Debug + Send + 'static {
    /// Identity and metadata.
    fn base(&self) -> &Base;

    /// Mutable identity and metadata.
    fn base_mut(&mut self) -> &mut Base;

    /// Serializes the payload as `format tag + data`.
    ///
    /// Returns empty bytes for deleted records. Fails if the record has no
    /// metadata or cannot be encoded in `format`.
    fn marshal(&self, format: Format) -> CoreResult<Vec<u8>>;

    /// Serializes the whole record into an envelope.
    fn marshal_record(&self) -> CoreResult<Vec<u8>> {
        let meta = self
            .base()
            .meta()
            .ok_or_else(|| CoreError::invalid_record("missing meta"))?;
        let payload = self.marshal(Format::Auto)?;
        envelope::pack(meta, &payload)
    }

    /// Field accessor over the payload, if the payload supports one.
    fn accessor(&mut self) -> Option<Box<dyn Accessor + '_>>;

    /// Whether this is a [`Wrapper`].
    fn is_wrapped(&self) -> bool {
        false
    }

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Composite key, `name:key`.
    fn key(&self) -> String {
        self.base().key()
    }

    /// Metadata, if attached.
    fn meta(&self) -> Option<&Meta> {
        self.base().meta()
    }
}

pub(crate) fn check_marshalable(base: &Base) -> CoreResult<&Meta> {
    base.meta()
        .ok_or_else(|| CoreError::invalid_record("missing meta"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_splits_at_first_colon() {
        assert_eq!(parse_key("core:a:b"), ("core", "a:b"));
        assert_eq!(parse_key("core:"), ("core", ""));
        assert_eq!(parse_key("core"), ("core", ""));
        assert_eq!(parse_key(""), ("", ""));
    }

    #[test]
    fn shared_records_lock() {
        let record = share(Wrapper::new("core:a", None, Format::Json, b"{}".to_vec()));
        let mut guard = record.lock();
        guard.base_mut().update_meta();
        assert!(guard.meta().is_some());
        assert!(guard.is_wrapped());
    }
}

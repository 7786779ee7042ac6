//! Undecoded payload record.

use super::{check_marshalable, envelope, Base, Meta, Record};
use crate::accessor::{Accessor, JsonBytesAccessor};
use crate::error::{CoreError, CoreResult};
use recdb_codec::Format;
use std::any::Any;

/// A record whose payload stays as raw bytes plus a format tag.
///
/// Backends return wrappers so records are only decoded when a caller asks
/// for a typed value via [`super::TypedRecord::unwrap`]. JSON wrappers also
/// expose a field accessor, which is what query matching runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapper {
    base: Base,
    format: Format,
    data: Vec<u8>,
}

impl Wrapper {
    /// Creates a wrapper for a composite `name:key`.
    #[must_use]
    pub fn new(key: &str, meta: Option<Meta>, format: Format, data: Vec<u8>) -> Self {
        let mut base = Base::new(key);
        if let Some(meta) = meta {
            base.set_meta(meta);
        }
        Self { base, format, data }
    }

    /// Decodes a stored envelope.
    pub fn new_raw(db_name: &str, db_key: &str, envelope: &[u8]) -> CoreResult<Self> {
        let env = envelope::unpack(envelope).map_err(|e| match e {
            CoreError::InvalidRecord { message } => {
                CoreError::invalid_record(format!("{db_name}:{db_key}: {message}"))
            }
            other => other,
        })?;
        let mut base = Base::with_parts(db_name, db_key);
        base.set_meta(env.meta);
        Ok(Self {
            base,
            format: env.format,
            data: env.data,
        })
    }

    /// Payload format.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Payload bytes without the format tag.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the wrapper, returning the payload bytes.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl Record for Wrapper {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn marshal(&self, format: Format) -> CoreResult<Vec<u8>> {
        if check_marshalable(&self.base)?.is_deleted() {
            return Ok(Vec::new());
        }
        if format != Format::Auto && format != self.format {
            return Err(CoreError::invalid_record(format!(
                "could not dump wrapped record as {format}, data is {}",
                self.format
            )));
        }
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.format.tag());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    fn accessor(&mut self) -> Option<Box<dyn Accessor + '_>> {
        if self.format != Format::Json || self.data.is_empty() {
            return None;
        }
        Some(Box::new(JsonBytesAccessor::new(&mut self.data)))
    }

    fn is_wrapped(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

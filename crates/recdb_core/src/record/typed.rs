//! Typed records.

use super::{check_marshalable, Base, Record, Wrapper};
use crate::accessor::{Accessor, StructAccessor};
use crate::error::{CoreError, CoreResult};
use recdb_codec::{dump, load_as_format, Codable, Format};
use std::any::Any;
use std::fmt;

/// A record carrying a typed value.
///
/// The value is encoded through codec dispatch, JSON unless another
/// format is chosen with [`TypedRecord::with_format`].
///
/// ```
/// use recdb_core::{Record, TypedRecord};
/// use serde_json::json;
///
/// let mut record = TypedRecord::new("core:settings/theme", json!({"dark": true}));
/// record.base_mut().update_meta();
/// assert_eq!(record.marshal(Default::default()).unwrap(), br#"J{"dark":true}"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord<T> {
    base: Base,
    format: Format,
    data: T,
}

impl<T: Codable + fmt::Debug + Send + 'static> TypedRecord<T> {
    /// Creates a record for a composite `name:key` without metadata.
    #[must_use]
    pub fn new(key: &str, data: T) -> Self {
        Self {
            base: Base::new(key),
            format: Format::Auto,
            data,
        }
    }

    /// Sets the format used when marshaling with [`Format::Auto`].
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Decodes a wrapper into a typed record, keeping its identity and
    /// metadata.
    pub fn unwrap(wrapper: &Wrapper) -> CoreResult<Self> {
        let data = load_as_format(wrapper.data(), wrapper.format())?;
        Ok(Self {
            base: wrapper.base().clone(),
            format: wrapper.format(),
            data,
        })
    }

    /// Converts any record holding a `T`: wrappers are decoded, typed
    /// records are cloned.
    pub fn from_record(record: &dyn Record) -> CoreResult<Self>
    where
        T: Clone,
    {
        let any = record.as_any();
        if let Some(typed) = any.downcast_ref::<Self>() {
            return Ok(typed.clone());
        }
        if let Some(wrapper) = any.downcast_ref::<Wrapper>() {
            return Self::unwrap(wrapper);
        }
        Err(CoreError::invalid_record(format!(
            "{} does not hold a {}",
            record.key(),
            std::any::type_name::<T>()
        )))
    }

    /// The value.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Mutable value.
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    /// Consumes the record, returning the value.
    #[must_use]
    pub fn into_data(self) -> T {
        self.data
    }
}

impl<T: Codable + fmt::Debug + Send + 'static> Record for TypedRecord<T> {
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
        let format = match format {
            Format::Auto => self.format,
            other => other,
        };
        Ok(dump(&self.data, format)?)
    }

    fn accessor(&mut self) -> Option<Box<dyn Accessor + '_>> {
        Some(Box::new(StructAccessor::new(&mut self.data)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

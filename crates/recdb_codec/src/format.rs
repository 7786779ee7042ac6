//! Format tags.

use crate::error::{CodecError, CodecResult};
use std::fmt;

/// Serialization format, identified on the wire by a single tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Let the encoder choose. Encodes as [`Format::Json`].
    #[default]
    Auto,
    /// UTF-8 string, stored as-is.
    String,
    /// Raw bytes, stored as-is.
    Bytes,
    /// JSON document.
    Json,
    /// CBOR document.
    Cbor,
    /// Fixed-size generated codec provided by the value type itself.
    GenCode,
}

impl Format {
    /// All formats that can appear as a leading tag.
    pub const TAGGED: [Format; 5] = [
        Format::String,
        Format::Bytes,
        Format::Json,
        Format::Cbor,
        Format::GenCode,
    ];

    /// Returns the tag byte of this format.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Format::Auto => 0,
            Format::String => b'S',
            Format::Bytes => b'X',
            Format::Json => b'J',
            Format::Cbor => b'C',
            Format::GenCode => b'G',
        }
    }

    /// Resolves a tag byte.
    pub fn from_tag(tag: u8) -> CodecResult<Self> {
        match tag {
            0 => Ok(Format::Auto),
            b'S' => Ok(Format::String),
            b'X' => Ok(Format::Bytes),
            b'J' => Ok(Format::Json),
            b'C' => Ok(Format::Cbor),
            b'G' => Ok(Format::GenCode),
            tag => Err(CodecError::UnknownFormat { tag }),
        }
    }

    /// Maps [`Format::Auto`] to the concrete default format.
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Format::Auto => Format::Json,
            other => other,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = CodecError;

    fn try_from(tag: u8) -> CodecResult<Self> {
        Self::from_tag(tag)
    }
}

impl From<Format> for u8 {
    fn from(format: Format) -> u8 {
        format.tag()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Auto => "auto",
            Format::String => "string",
            Format::Bytes => "bytes",
            Format::Json => "json",
            Format::Cbor => "cbor",
            Format::GenCode => "gencode",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_resolve_back() {
        for format in Format::TAGGED {
            assert_eq!(Format::from_tag(format.tag()).unwrap(), format);
        }
        assert_eq!(Format::from_tag(0).unwrap(), Format::Auto);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert_eq!(
            Format::from_tag(b'Q'),
            Err(CodecError::UnknownFormat { tag: b'Q' })
        );
    }

    #[test]
    fn auto_resolves_to_json() {
        assert_eq!(Format::Auto.resolve(), Format::Json);
        assert_eq!(Format::Cbor.resolve(), Format::Cbor);
    }
}

//! Format dispatch.
//!
//! `dump` prefixes the encoded body with the format tag, `load` reads the
//! tag back and picks the matching decoder, and `load_as_format` decodes a
//! bare body with a caller-chosen format.

use crate::error::{CodecError, CodecResult};
use crate::format::Format;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A value that can be stored under any [`Format`].
///
/// JSON, CBOR, string and bytes formats go through serde. The fixed-size
/// [`Format::GenCode`] layout has no generic form, so types that support
/// it override the two hooks below.
pub trait Codable: Serialize + DeserializeOwned {
    /// Encodes `self` with the type's fixed-size layout, if it has one.
    fn gencode_marshal(&self) -> Option<Vec<u8>> {
        None
    }

    /// Decodes the type's fixed-size layout, if it has one.
    fn gencode_unmarshal(_data: &[u8]) -> Option<CodecResult<Self>> {
        None
    }
}

impl Codable for String {}
impl Codable for Vec<u8> {}
impl Codable for Value {}

/// Encodes `value` as `[format tag] + body`.
///
/// [`Format::Auto`] encodes as JSON.
pub fn dump<T: Codable>(value: &T, format: Format) -> CodecResult<Vec<u8>> {
    let format = format.resolve();
    let mut out = vec![format.tag()];
    out.extend(dump_body(value, format)?);
    Ok(out)
}

/// Encodes `value` without the leading format tag.
pub fn dump_body<T: Codable>(value: &T, format: Format) -> CodecResult<Vec<u8>> {
    match format.resolve() {
        Format::Json => serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string())),
        Format::Cbor => {
            let mut out = Vec::new();
            ciborium::into_writer(value, &mut out)
                .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
            Ok(out)
        }
        Format::String => match to_value(value)? {
            Value::String(s) => Ok(s.into_bytes()),
            other => Err(CodecError::shape_mismatch(format!(
                "string format requires a string value, got {}",
                kind(&other)
            ))),
        },
        Format::Bytes => match to_value(value)? {
            Value::String(s) => Ok(s.into_bytes()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| CodecError::shape_mismatch("bytes format requires byte values"))
                })
                .collect(),
            other => Err(CodecError::shape_mismatch(format!(
                "bytes format requires a byte sequence, got {}",
                kind(&other)
            ))),
        },
        Format::GenCode => value
            .gencode_marshal()
            .ok_or_else(|| CodecError::unsupported_format(Format::GenCode.to_string())),
        Format::Auto => unreachable_auto(),
    }
}

/// Decodes tagged bytes, choosing the decoder from the leading tag.
pub fn load<T: Codable>(data: &[u8]) -> CodecResult<T> {
    let (&tag, body) = data.split_first().ok_or(CodecError::EmptyInput)?;
    match Format::from_tag(tag)? {
        Format::Auto => Err(CodecError::malformed("stored data carries no format tag")),
        format => load_as_format(body, format),
    }
}

/// Decodes an untagged body with the given format.
pub fn load_as_format<T: Codable>(body: &[u8], format: Format) -> CodecResult<T> {
    match format.resolve() {
        Format::Json => serde_json::from_slice(body).map_err(json_error),
        Format::Cbor => ciborium::from_reader(body).map_err(|e| match e {
            ciborium::de::Error::Semantic(_, message) => CodecError::shape_mismatch(message),
            other => CodecError::malformed(other.to_string()),
        }),
        Format::String => {
            let text = std::str::from_utf8(body)
                .map_err(|_| CodecError::malformed("string body is not valid UTF-8"))?;
            from_value(Value::String(text.to_owned()))
        }
        Format::Bytes => {
            let items = body.iter().map(|&b| Value::from(b)).collect();
            match from_value(Value::Array(items)) {
                Ok(value) => Ok(value),
                Err(err) => match std::str::from_utf8(body) {
                    Ok(text) => from_value(Value::String(text.to_owned())).map_err(|_| err),
                    Err(_) => Err(err),
                },
            }
        }
        Format::GenCode => T::gencode_unmarshal(body)
            .unwrap_or_else(|| Err(CodecError::unsupported_format(Format::GenCode.to_string()))),
        Format::Auto => unreachable_auto(),
    }
}

fn unreachable_auto<T>() -> CodecResult<T> {
    Err(CodecError::unsupported_format(Format::Auto.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> CodecResult<Value> {
    serde_json::to_value(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> CodecResult<T> {
    serde_json::from_value(value).map_err(|e| CodecError::shape_mismatch(e.to_string()))
}

fn json_error(err: serde_json::Error) -> CodecError {
    match err.classify() {
        serde_json::error::Category::Data => CodecError::shape_mismatch(err.to_string()),
        serde_json::error::Category::Eof => CodecError::UnexpectedEof,
        _ => CodecError::malformed(err.to_string()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

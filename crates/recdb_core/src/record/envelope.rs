//! Binary record envelope.
//!
//! ```text
//! varint(version = 1) | varint(len) metadata-block | payload
//! ```
//!
//! The metadata block is a format-tagged dump of [`Meta`], normally
//! `'G'` followed by the 34-byte fixed layout. Blocks written before the
//! tag was introduced are exactly 34 raw bytes; they are recognised by
//! their length and a zero at index 4 (the fifth byte of the `created`
//! timestamp, zero for any date before 2106).
//!
//! The payload is `format-tag | data`, or empty for tombstones. An empty
//! payload reads back as empty JSON.

use super::meta::{Meta, GENCODE_SIZE};
use crate::error::{CoreError, CoreResult};
use recdb_codec::{dump, load, varint, Format};

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Record metadata.
    pub meta: Meta,
    /// Payload format.
    pub format: Format,
    /// Payload bytes without the format tag.
    pub data: Vec<u8>,
}

/// Builds an envelope around a tagged payload.
pub fn pack(meta: &Meta, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let meta_block = dump(meta, Format::GenCode)?;
    let mut out = Vec::with_capacity(2 + meta_block.len() + 1 + payload.len());
    out.extend(varint::pack8(ENVELOPE_VERSION));
    varint::append_block(&mut out, &meta_block);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits an envelope into metadata, payload format and payload data.
pub fn unpack(data: &[u8]) -> CoreResult<Envelope> {
    let (version, mut offset) = varint::unpack8(data)
        .map_err(|e| CoreError::invalid_record(format!("could not read envelope version: {e}")))?;
    if version != ENVELOPE_VERSION {
        return Err(CoreError::invalid_record(format!(
            "incompatible record version {version}"
        )));
    }

    let (block, n) = varint::next_block(&data[offset..])
        .map_err(|e| CoreError::invalid_record(format!("could not read metadata block: {e}")))?;
    offset += n;
    let meta = decode_meta(block)?;

    let payload = &data[offset..];
    if payload.is_empty() {
        return Ok(Envelope {
            meta,
            format: Format::Json,
            data: Vec::new(),
        });
    }

    let (tag, n) = varint::unpack8(payload)
        .map_err(|e| CoreError::invalid_record(format!("could not read payload format: {e}")))?;
    let format = Format::from_tag(tag)?;
    Ok(Envelope {
        meta,
        format,
        data: payload[n..].to_vec(),
    })
}

fn decode_meta(block: &[u8]) -> CoreResult<Meta> {
    if block.len() == GENCODE_SIZE && block[4] == 0 {
        return Ok(Meta::from_gencode(block)?);
    }
    load::<Meta>(block)
        .map_err(|e| CoreError::invalid_record(format!("could not decode metadata: {e}")))
}

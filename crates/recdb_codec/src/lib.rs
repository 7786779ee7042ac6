//! # recdb Codec
//!
//! Format-tagged serialization for recdb.
//!
//! Stored payloads carry a single leading tag byte naming their format, so
//! readers can decode without out-of-band schema information:
//!
//! | Tag   | Format   |
//! |-------|----------|
//! | `'S'` | string   |
//! | `'X'` | bytes    |
//! | `'J'` | JSON     |
//! | `'C'` | CBOR     |
//! | `'G'` | gencode  |
//!
//! The [`varint`] module provides the unsigned varints and length-prefixed
//! blocks used by the record envelope.
//!
//! ## Usage
//!
//! ```
//! use recdb_codec::{dump, load, Format};
//! use serde_json::json;
//!
//! let bytes = dump(&json!({"x": 1}), Format::Json).unwrap();
//! assert_eq!(bytes[0], b'J');
//! let back: serde_json::Value = load(&bytes).unwrap();
//! assert_eq!(back, json!({"x": 1}));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dispatch;
mod error;
mod format;
pub mod varint;

pub use dispatch::{dump, dump_body, load, load_as_format, Codable};
pub use error::{CodecError, CodecResult};
pub use format::Format;

//! Cross-format behaviour of the public codec API.

use proptest::prelude::*;
use recdb_codec::{dump, dump_body, load, load_as_format, CodecError, Format};
use serde_json::{json, Value};

#[test]
fn dump_body_matches_tagged_dump() {
    let value = json!({"name": "a", "list": [1, 2, 3]});
    for format in [Format::Json, Format::Cbor] {
        let tagged = dump(&value, format).unwrap();
        let body = dump_body(&value, format).unwrap();
        assert_eq!(&tagged[1..], body.as_slice());
        assert_eq!(load_as_format::<Value>(&body, format).unwrap(), value);
    }
}

#[test]
fn forced_format_ignores_content() {
    // A JSON body decoded as a string yields the raw text.
    let body = dump_body(&json!({"a": 1}), Format::Json).unwrap();
    let text: String = load_as_format(&body, Format::String).unwrap();
    assert_eq!(text, r#"{"a":1}"#);
}

#[test]
fn cbor_garbage_is_malformed() {
    let err = load::<Value>(&[b'C', 0xff, 0xff]).unwrap_err();
    assert!(matches!(
        err,
        CodecError::Malformed { .. } | CodecError::ShapeMismatch { .. }
    ));
}

proptest! {
    #[test]
    fn strings_survive_every_text_format(s in ".*") {
        for format in [Format::String, Format::Json, Format::Cbor] {
            let data = dump(&s, format).unwrap();
            prop_assert_eq!(load::<String>(&data).unwrap(), s.clone());
        }
    }

    #[test]
    fn bytes_survive_bytes_and_cbor(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        for format in [Format::Bytes, Format::Cbor, Format::Json] {
            let data = dump(&bytes, format).unwrap();
            prop_assert_eq!(load::<Vec<u8>>(&data).unwrap(), bytes.clone());
        }
    }
}

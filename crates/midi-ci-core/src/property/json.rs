//! JSON as carried in SysEx: parse from bytes, write 7-bit ASCII.
//!
//! Parsing and the data model come from `serde_json`.  The only MIDI-CI
//! specific part is the output form: every character outside ASCII is
//! written as a `\uXXXX` escape (a surrogate pair above U+FFFF) so the
//! serialized text never contains a byte above 0x7F.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::PropertyError;

/// Parses a JSON document from raw header/body bytes.
pub fn parse(bytes: &[u8]) -> Result<Value, PropertyError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Deserializes a typed value from raw bytes.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PropertyError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serializes any value to 7-bit clean JSON bytes.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, PropertyError> {
    let text = serde_json::to_string(value)?;
    Ok(escape_non_ascii(&text).into_bytes())
}

/// Replaces every non-ASCII character of already-serialized JSON with its
/// `\uXXXX` escape.
///
/// Non-ASCII characters can only occur inside JSON strings, where the
/// escape is always valid.
pub fn escape_non_ascii(json: &str) -> String {
    if json.is_ascii() {
        return json.to_string();
    }
    let mut out = String::with_capacity(json.len() + 16);
    let mut units = [0u16; 2];
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

//! Property body encodings (`mutualEncoding`).
//!
//! # Mcoded7
//!
//! SysEx data bytes are 7-bit, so arbitrary 8-bit data is repacked: every
//! group of up to seven input bytes is preceded by one byte holding their
//! top bits.  Bit 6 of that byte belongs to the first byte of the group,
//! bit 5 to the second, and so on.
//!
//! ```text
//! in:   [a][b][c][d][e][f][g]
//! out:  [0 a7 b7 c7 d7 e7 f7 g7][a&7F][b&7F]...[g&7F]
//! ```

use super::json::escape_non_ascii;
use super::PropertyError;

pub const ENCODING_ASCII: &str = "ASCII";
pub const ENCODING_MCODED7: &str = "Mcoded7";
pub const ENCODING_ZLIB_MCODED7: &str = "zlib+Mcoded7";

/// Encodings a Property Exchange body may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Ascii,
    Mcoded7,
    /// zlib compression followed by Mcoded7.  Recognized but not available.
    ZlibMcoded7,
}

impl BodyEncoding {
    /// Looks up an encoding by its `mutualEncoding` name.
    pub fn from_name(name: &str) -> Result<Self, PropertyError> {
        match name {
            ENCODING_ASCII => Ok(BodyEncoding::Ascii),
            ENCODING_MCODED7 => Ok(BodyEncoding::Mcoded7),
            ENCODING_ZLIB_MCODED7 => Ok(BodyEncoding::ZlibMcoded7),
            other => Err(PropertyError::UnsupportedEncoding(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyEncoding::Ascii => ENCODING_ASCII,
            BodyEncoding::Mcoded7 => ENCODING_MCODED7,
            BodyEncoding::ZlibMcoded7 => ENCODING_ZLIB_MCODED7,
        }
    }

    /// Encodes a decoded body for the wire.
    ///
    /// ASCII bodies that contain UTF-8 text are escaped; bytes that are
    /// neither 7-bit nor UTF-8 are rejected.
    pub fn encode(self, data: &[u8]) -> Result<Vec<u8>, PropertyError> {
        match self {
            BodyEncoding::Ascii => {
                if data.is_ascii() {
                    return Ok(data.to_vec());
                }
                let text = std::str::from_utf8(data).map_err(|_| PropertyError::InvalidAscii)?;
                Ok(escape_non_ascii(text).into_bytes())
            }
            BodyEncoding::Mcoded7 => Ok(mcoded7_encode(data)),
            BodyEncoding::ZlibMcoded7 => Err(PropertyError::UnsupportedEncoding(
                ENCODING_ZLIB_MCODED7.to_string(),
            )),
        }
    }

    /// Decodes a wire body.
    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>, PropertyError> {
        match self {
            BodyEncoding::Ascii => {
                if !data.is_ascii() {
                    return Err(PropertyError::InvalidAscii);
                }
                Ok(data.to_vec())
            }
            BodyEncoding::Mcoded7 => mcoded7_decode(data),
            BodyEncoding::ZlibMcoded7 => Err(PropertyError::UnsupportedEncoding(
                ENCODING_ZLIB_MCODED7.to_string(),
            )),
        }
    }
}

/// Packs arbitrary bytes into a 7-bit clean Mcoded7 stream.
pub fn mcoded7_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len().div_ceil(7));
    for group in data.chunks(7) {
        let high_bits = group
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, b)| acc | ((b >> 7) << (6 - i)));
        out.push(high_bits);
        out.extend(group.iter().map(|b| b & 0x7F));
    }
    out
}

/// Unpacks an Mcoded7 stream.
///
/// # Errors
///
/// [`PropertyError::Mcoded7`] if any byte has its top bit set or a group
/// consists of a header byte with no data.
pub fn mcoded7_decode(data: &[u8]) -> Result<Vec<u8>, PropertyError> {
    if let Some(pos) = data.iter().position(|b| *b > 0x7F) {
        return Err(PropertyError::Mcoded7(format!(
            "byte 0x{:02X} at offset {pos} is not 7-bit",
            data[pos]
        )));
    }
    let mut out = Vec::with_capacity(data.len());
    for group in data.chunks(8) {
        let (high_bits, rest) = match group.split_first() {
            Some((h, rest)) if !rest.is_empty() => (*h, rest),
            _ => {
                return Err(PropertyError::Mcoded7(
                    "trailing header byte without data".to_string(),
                ))
            }
        };
        out.extend(
            rest.iter()
                .enumerate()
                .map(|(i, b)| b | (((high_bits >> (6 - i)) & 1) << 7)),
        );
    }
    Ok(out)
}

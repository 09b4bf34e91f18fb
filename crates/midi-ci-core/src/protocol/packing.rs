//! Integer packing helpers for SysEx-safe fields.
//!
//! MIDI-CI carries most integers "7-bit packed": an N×7-bit value is split
//! into N bytes, least significant group first, each byte holding 7 bits.
//! A handful of identity fields (manufacturer, family, model, software
//! revision) are instead copied byte-for-byte, least significant byte first.
//! Those "direct" forms are not guaranteed 7-bit clean; they are kept as-is
//! for compatibility with existing devices.
//!
//! Every writer appends to a `Vec<u8>`; every reader takes the full message
//! buffer plus an offset and fails with [`ProtocolError::InsufficientData`]
//! instead of panicking on a short buffer.

use super::codec::ProtocolError;

/// Largest value representable in 14 bits.
pub const MAX_14BIT: u32 = 0x3FFF;
/// Largest value representable in 21 bits.
pub const MAX_21BIT: u32 = 0x1F_FFFF;
/// Largest value representable in 28 bits.
pub const MAX_28BIT: u32 = 0x0FFF_FFFF;

// ── 7-bit packed writers ──────────────────────────────────────────────────────

fn push_packed(
    buf: &mut Vec<u8>,
    value: u32,
    groups: usize,
    max: u32,
    field: &'static str,
) -> Result<(), ProtocolError> {
    if value > max {
        return Err(ProtocolError::ValueOutOfRange {
            field,
            value: value as u64,
            max: max as u64,
        });
    }
    for i in 0..groups {
        buf.push(((value >> (7 * i)) & 0x7F) as u8);
    }
    Ok(())
}

/// Appends a 14-bit value as two 7-bit bytes.
pub fn push_14bit(buf: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), ProtocolError> {
    push_packed(buf, value, 2, MAX_14BIT, field)
}

/// Appends a 21-bit value as three 7-bit bytes.
pub fn push_21bit(buf: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), ProtocolError> {
    push_packed(buf, value, 3, MAX_21BIT, field)
}

/// Appends a 28-bit value as four 7-bit bytes.
pub fn push_28bit(buf: &mut Vec<u8>, value: u32, field: &'static str) -> Result<(), ProtocolError> {
    push_packed(buf, value, 4, MAX_28BIT, field)
}

// ── 7-bit packed readers ──────────────────────────────────────────────────────

fn read_packed(buf: &[u8], offset: usize, groups: usize, context: &str) -> Result<u32, ProtocolError> {
    let bytes = slice(buf, offset, groups, context)?;
    Ok(bytes
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(b & 0x7F) << (7 * i))))
}

/// Reads a 14-bit value from two bytes at `offset`.
pub fn read_14bit(buf: &[u8], offset: usize, context: &str) -> Result<u32, ProtocolError> {
    read_packed(buf, offset, 2, context)
}

/// Reads a 21-bit value from three bytes at `offset`.
pub fn read_21bit(buf: &[u8], offset: usize, context: &str) -> Result<u32, ProtocolError> {
    read_packed(buf, offset, 3, context)
}

/// Reads a 28-bit value from four bytes at `offset`.
pub fn read_28bit(buf: &[u8], offset: usize, context: &str) -> Result<u32, ProtocolError> {
    read_packed(buf, offset, 4, context)
}

// ── Direct (byte-for-byte) forms ──────────────────────────────────────────────

/// Reads `N` bytes at `offset` as a little-endian integer.
pub fn read_direct(buf: &[u8], offset: usize, len: usize, context: &str) -> Result<u32, ProtocolError> {
    let bytes = slice(buf, offset, len, context)?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Reads a single byte at `offset`.
pub fn read_u8(buf: &[u8], offset: usize, context: &str) -> Result<u8, ProtocolError> {
    buf.get(offset)
        .copied()
        .ok_or_else(|| ProtocolError::InsufficientData {
            kind: context.to_string(),
            needed: offset.saturating_add(1),
            available: buf.len(),
        })
}

/// Borrows `len` bytes at `offset`.
pub fn slice<'a>(buf: &'a [u8], offset: usize, len: usize, context: &str) -> Result<&'a [u8], ProtocolError> {
    let end = offset.saturating_add(len);
    buf.get(offset..end).ok_or_else(|| ProtocolError::InsufficientData {
        kind: context.to_string(),
        needed: end,
        available: buf.len(),
    })
}

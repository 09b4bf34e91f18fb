//! MIDI Unique Identifiers and MIDI-CI addresses.
//!
//! A MUID identifies one MIDI-CI capable device (or function block) on a
//! MIDI connection.  It is a 28-bit number, but on the wire and in this crate
//! it is kept in its *byte-packed* form: a `u32` whose four bytes each hold 7
//! significant bits.  That form is what gets copied byte-for-byte into a
//! System Exclusive message, so the invariant "every byte has its top bit
//! clear" is checked once at construction and never again.
//!
//! ```text
//! 28-bit value   0x0FFF_FFFF
//! packed form    0x7F7F_7F7F  (the reserved broadcast MUID)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Mask applied to the packed representation; every byte is 7-bit.
pub const MUID_MASK: u32 = 0x7F7F_7F7F;

/// Errors raised when constructing a [`Muid`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MuidError {
    /// At least one of the four bytes has its top bit set.
    #[error("MUID 0x{0:08X} is not 7-bit clean")]
    NotSevenBitClean(u32),
}

/// A MIDI Unique ID in byte-packed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Muid(u32);

impl Muid {
    /// The reserved broadcast MUID, addressed to every device.
    pub const BROADCAST: Muid = Muid(MUID_MASK);

    /// Creates a MUID from its byte-packed form.
    ///
    /// # Errors
    ///
    /// Returns [`MuidError::NotSevenBitClean`] if any byte has bit 7 set.
    pub fn new(packed: u32) -> Result<Self, MuidError> {
        if packed & MUID_MASK != packed {
            return Err(MuidError::NotSevenBitClean(packed));
        }
        Ok(Muid(packed))
    }

    /// Creates a MUID from the plain 28-bit number (upper bits ignored).
    pub fn from_28bit(value: u32) -> Self {
        Muid(
            (value & 0x7F)
                | ((value >> 7) & 0x7F) << 8
                | ((value >> 14) & 0x7F) << 16
                | ((value >> 21) & 0x7F) << 24,
        )
    }

    /// Generates a random, non-broadcast MUID.
    ///
    /// Engines never call this themselves; the embedder picks the MUID and
    /// passes it in so construction stays deterministic.
    pub fn random() -> Self {
        loop {
            let bits = Uuid::new_v4().as_u128() as u32;
            let candidate = Muid(bits & MUID_MASK);
            if !candidate.is_broadcast() {
                return candidate;
            }
        }
    }

    /// Returns the byte-packed representation.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Returns the plain 28-bit number.
    pub fn to_28bit(self) -> u32 {
        (self.0 & 0x7F)
            | ((self.0 >> 8) & 0x7F) << 7
            | ((self.0 >> 16) & 0x7F) << 14
            | ((self.0 >> 24) & 0x7F) << 21
    }

    /// Returns `true` for [`Muid::BROADCAST`].
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// Wire bytes, least significant first.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Reads four wire bytes.  Top bits are masked off, so a misbehaving
    /// peer cannot smuggle an invalid MUID into the engine.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Muid(u32::from_le_bytes(bytes) & MUID_MASK)
    }
}

impl TryFrom<u32> for Muid {
    type Error = MuidError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Muid::new(value)
    }
}

impl From<Muid> for u32 {
    fn from(muid: Muid) -> Self {
        muid.0
    }
}

impl fmt::Display for Muid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// The "device id" byte of a MIDI-CI message.
///
/// `0x00..=0x0F` addresses a single MIDI channel, `0x7E` the whole group
/// and `0x7F` the whole function block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u8);

impl Address {
    pub const GROUP: Address = Address(0x7E);
    pub const FUNCTION_BLOCK: Address = Address(0x7F);

    /// Returns the channel address for `channel` (masked to 0..=15).
    pub fn channel(channel: u8) -> Self {
        Address(channel & 0x0F)
    }

    pub fn is_channel(self) -> bool {
        self.0 <= 0x0F
    }

    /// `true` for group and function-block addressing.
    pub fn is_wide(self) -> bool {
        self == Self::GROUP || self == Self::FUNCTION_BLOCK
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Address(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::GROUP => write!(f, "group"),
            Self::FUNCTION_BLOCK => write!(f, "function-block"),
            Address(ch) => write!(f, "channel {ch}"),
        }
    }
}

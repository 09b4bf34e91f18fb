//! Domain entities shared by every MIDI-CI role.
//!
//! Nothing in here performs I/O or knows about the wire layout; the codec in
//! [`crate::protocol`] maps these types to and from bytes, and the device
//! engine owns the mutable lists.

pub mod device;
pub mod muid;
pub mod profile;
pub mod property;

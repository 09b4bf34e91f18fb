//! # midi-ci-core
//!
//! Shared library for MIDI-CI (Capability Inquiry) containing the SysEx wire
//! codec, the message model, Property Exchange chunking and the Common Rules
//! property codec.
//!
//! This crate holds no engine state and performs no I/O.  The stateful
//! protocol engine lives in `midi-ci-device`.
//!
//! # Architecture overview
//!
//! MIDI-CI lets two MIDI devices discover each other, toggle "profiles"
//! (standardized behaviours such as "General MIDI 2") and read or write
//! "properties" (JSON resources such as `DeviceInfo`).  All of it travels as
//! Universal System Exclusive messages.
//!
//! - **`protocol`** – The 13-byte common header, one payload struct per
//!   message kind, the encoder/decoder and the helpers that split large
//!   Property Exchange bodies into chunks and reassemble them.
//!
//! - **`domain`** – MUIDs, addresses, device identity, profiles and property
//!   metadata.  No wire knowledge.
//!
//! - **`property`** – JSON headers and bodies as defined by the Common Rules
//!   for Property Exchange: typed headers, ASCII/Mcoded7 body encodings,
//!   partial updates and pagination.

pub mod domain;
pub mod property;
pub mod protocol;

pub use domain::device::{DeviceDetails, DeviceInfo};
pub use domain::muid::{Address, Muid, MuidError};
pub use domain::profile::{Profile, ProfileId, ProfileList};
pub use domain::property::{PropertyList, PropertyMetadata, PropertyValue, SetCapability};
pub use property::{PropertyError, PropertyHeader, SubscriptionCommand};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::Message;

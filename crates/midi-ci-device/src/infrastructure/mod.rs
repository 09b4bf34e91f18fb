//! Infrastructure layer for the MIDI-CI engine.
//!
//! Contains the edges the engine talks through: the outbound transport and
//! report traits, the observer bus, and TOML configuration storage.
//!
//! Nothing here knows the protocol rules.  The application layer decides
//! what to send and when; these modules only carry it out.

pub mod events;
pub mod storage;
pub mod transport;

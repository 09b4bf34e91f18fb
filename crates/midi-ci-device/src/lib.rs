//! midi-ci-device library entry point.
//!
//! Re-exports the public modules so that integration tests in `tests/` and
//! embedding applications share the same module tree.
//!
//! # What does midi-ci-device do? (for beginners)
//!
//! MIDI-CI ("Capability Inquiry") lets two MIDI devices find out what the
//! other can do and configure it, using System Exclusive messages over an
//! ordinary MIDI connection.  This crate is the stateful half of the
//! implementation; the wire codec lives in `midi-ci-core`.
//!
//! The embedding application:
//!
//! 1. Builds a [`DeviceConfig`] (or loads one from TOML) and creates a
//!    [`MidiCiDevice`] with its MUID and a [`CiTransport`].
//! 2. Registers the profiles and properties it offers.
//! 3. Feeds every received MIDI-CI SysEx payload to
//!    [`MidiCiDevice::process_input`].
//! 4. Calls the outbound API (`send_discovery`, `get_property`, ...) and
//!    watches [`CiEvent`]s for the results.
//! 5. Calls [`MidiCiDevice::purge_expired`] from time to time.

/// Application layer: the protocol engine.
pub mod application;

/// Infrastructure layer: transport, observers and configuration.
pub mod infrastructure;

pub use application::device::{CiError, MidiCiDevice};
pub use infrastructure::events::CiEvent;
pub use infrastructure::storage::config::DeviceConfig;
pub use infrastructure::transport::{CiTransport, MidiMessageReporter, QueueTransport, ReportRequest};

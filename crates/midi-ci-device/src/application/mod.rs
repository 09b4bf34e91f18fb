//! Application layer: the MIDI-CI protocol engine.
//!
//! # How does a MIDI-CI conversation work? (for beginners)
//!
//! Every MIDI-CI device has a MUID, a random 28-bit id.  A device that wants
//! to talk to others (the *initiator*) broadcasts a Discovery Inquiry; every
//! device that hears it (a *responder*) answers with a Discovery Reply
//! describing itself.  From then on the initiator addresses the responder by
//! its MUID to:
//!
//! 1. ask which *profiles* it supports and switch them on or off;
//! 2. read, write and subscribe to *properties*, JSON resources such as
//!    `DeviceInfo`, possibly split over many SysEx chunks;
//! 3. ask it to report its current MIDI state (Process Inquiry).
//!
//! One [`device::MidiCiDevice`] plays both roles at the same time.
//!
//! # Sub-modules
//!
//! - **`device`** – `MidiCiDevice`: construction, the outbound API, local
//!   profile and property management, and timeout purging.
//!
//! - **`dispatch`** – `process_input` and one handler per inbound message
//!   kind.  Converts every failure into a NAK, an error reply or a log line.
//!
//! - **`messenger`** – Owns the transport, the event bus and the request-id
//!   counter; encodes and chunks outbound messages.
//!
//! - **`connection`** – What the initiator knows about one responder:
//!   identity, mirrored profiles and properties, open requests.
//!
//! - **`subscription`** – The initiator's subscription state machine.
//!
//! - **`profile_host`** – Profiles this device offers.
//!
//! - **`property_host`** – Properties this device serves (Common Rules
//!   responder) and who subscribed to them.

pub mod connection;
pub mod device;
pub mod dispatch;
pub mod messenger;
pub mod profile_host;
pub mod property_host;
pub mod subscription;

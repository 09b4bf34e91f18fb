//! Collaborator interfaces at the edge of the engine.
//!
//! The engine never touches a MIDI port.  Every encoded message is handed to
//! a [`CiTransport`]; the embedder wraps it in F0/F7 (or UMP SysEx7 packets)
//! and writes it to whatever port belongs to `group`.
//!
//! MIDI Message Report content is produced by a [`MidiMessageReporter`],
//! typically backed by the embedder's own channel-state tracking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use midi_ci_core::Address;

/// Outbound byte sink.
///
/// Calls are synchronous and must not re-enter the engine.
#[cfg_attr(test, mockall::automock)]
pub trait CiTransport {
    /// Sends one encoded MIDI-CI message (without F0/F7) on `group`.
    fn send_output(&mut self, group: u8, bytes: &[u8]);

    /// Sends one plain MIDI message produced by a MIDI Message Report.
    fn send_midi_message(&mut self, group: u8, bytes: &[u8]);
}

/// Filter of a MIDI Message Report inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRequest {
    pub group: u8,
    pub address: Address,
    pub message_data_control: u8,
    pub system_messages: u8,
    pub channel_controller_messages: u8,
    pub note_data_messages: u8,
}

/// Produces the MIDI messages that describe current state.
///
/// The returned iterator is finite, consumed once, and yields one MIDI
/// message per item.
pub trait MidiMessageReporter {
    fn report<'a>(&'a mut self, request: &ReportRequest)
        -> Box<dyn Iterator<Item = Vec<u8>> + 'a>;
}

/// A transport that queues outbound traffic in memory.
///
/// Clones share one queue, so a test (or a loopback bridge between two
/// engines) can keep a handle and drain what the engine sent.
#[derive(Debug, Clone, Default)]
pub struct QueueTransport {
    sysex: Rc<RefCell<VecDeque<(u8, Vec<u8>)>>>,
    midi: Rc<RefCell<VecDeque<(u8, Vec<u8>)>>>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued MIDI-CI message.
    pub fn drain(&self) -> Vec<(u8, Vec<u8>)> {
        self.sysex.borrow_mut().drain(..).collect()
    }

    /// Removes and returns every queued report message.
    pub fn drain_midi(&self) -> Vec<(u8, Vec<u8>)> {
        self.midi.borrow_mut().drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.sysex.borrow().len()
    }
}

impl CiTransport for QueueTransport {
    fn send_output(&mut self, group: u8, bytes: &[u8]) {
        self.sysex.borrow_mut().push_back((group, bytes.to_vec()));
    }

    fn send_midi_message(&mut self, group: u8, bytes: &[u8]) {
        self.midi.borrow_mut().push_back((group, bytes.to_vec()));
    }
}

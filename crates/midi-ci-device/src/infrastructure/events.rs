//! Observer sink for engine activity.
//!
//! Each engine owns one [`EventBus`].  Handlers are registered explicitly and
//! are called synchronously, in registration order, from inside whichever
//! engine call produced the event.  They observe only: nothing a handler
//! does feeds back into dispatch.

use std::fmt;

use midi_ci_core::protocol::{Acknowledge, MidiMessageReportReply, ProfileDetailsReply, ProfileSpecificData};
use midi_ci_core::{Message, Muid};

use crate::application::subscription::SubscriptionState;

/// Something the engine did or saw.
#[derive(Debug, Clone, PartialEq)]
pub enum CiEvent {
    /// A message was decoded and is about to be dispatched.
    MessageReceived(Message),
    /// A message was handed to the transport.
    MessageSent(Message),
    /// A Discovery Reply created a connection.
    ConnectionAdded(Muid),
    /// A connection was dropped (Invalidate MUID or re-discovery).
    ConnectionRemoved(Muid),
    AckReceived(Acknowledge),
    NakReceived(Acknowledge),
    /// A MIDI-CI message of a kind this engine does not know.
    UnknownMessage { group: u8, bytes: Vec<u8> },
    /// The profile list of `muid` changed; `muid` is the local MUID for
    /// local profiles.
    ProfilesUpdated { muid: Muid },
    /// A property value of `muid` changed; `muid` is the local MUID for
    /// local properties.
    PropertyUpdated {
        muid: Muid,
        resource: String,
        res_id: Option<String>,
    },
    /// A property request to `muid` was answered with an error status, or
    /// with a reply that could not be decoded (`status` 0).
    PropertyRequestFailed {
        muid: Muid,
        resource: String,
        status: u16,
        message: Option<String>,
    },
    SubscriptionStateChanged {
        muid: Muid,
        resource: String,
        res_id: Option<String>,
        state: SubscriptionState,
    },
    ProcessInquiryReply { muid: Muid, supported_features: u8 },
    MidiMessageReportReply(MidiMessageReportReply),
    MidiMessageReportFinished { muid: Muid },
    ProfileDetailsReceived(ProfileDetailsReply),
    ProfileSpecificDataReceived(ProfileSpecificData),
    /// A Property Exchange Notify message arrived.
    PropertyNotify { muid: Muid, request_id: u8, header: Vec<u8> },
    /// A request got no reply within the request timeout.
    RequestExpired { muid: Muid, request_id: u8 },
    /// A chunked transfer stalled and its partial data was dropped.
    ChunkTransferExpired { muid: Muid, request_id: u8 },
}

/// A registered observer.
pub type EventHandler = Box<dyn FnMut(&CiEvent)>;

/// Ordered collection of observers.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<EventHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`; it receives every event published afterwards.
    pub fn subscribe(&mut self, handler: impl FnMut(&CiEvent) + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Calls every handler with `event`.
    pub fn publish(&mut self, event: &CiEvent) {
        for handler in &mut self.handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

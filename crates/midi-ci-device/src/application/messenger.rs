//! Outbound half of the engine.
//!
//! The messenger owns the transport, the event bus and the request-id
//! counter, and knows this device's MUID and message version.  Keeping them
//! apart from the connection table lets handlers hold a connection mutably
//! while still sending.

use midi_ci_core::protocol::{
    encode_into, split_into_chunks, Acknowledge, Common, MessageType, NakStatus, PropertyChunk,
    RequestIdCounter,
};
use midi_ci_core::{Address, Message, Muid, PropertyHeader};
use tracing::trace;

use super::device::CiError;
use crate::infrastructure::events::{CiEvent, EventBus};
use crate::infrastructure::transport::CiTransport;

pub struct Messenger {
    transport: Box<dyn CiTransport>,
    events: EventBus,
    request_ids: RequestIdCounter,
    muid: Muid,
    version: u8,
    /// Sized to the largest SysEx this device may send.
    buffer: Vec<u8>,
}

impl Messenger {
    pub fn new(muid: Muid, version: u8, max_sysex_size: usize, transport: Box<dyn CiTransport>) -> Self {
        Self {
            transport,
            events: EventBus::new(),
            request_ids: RequestIdCounter::new(),
            muid,
            version,
            buffer: vec![0; max_sysex_size],
        }
    }

    pub fn muid(&self) -> Muid {
        self.muid
    }

    /// Envelope for a message from this device.
    pub fn common(&self, destination: Muid, address: Address, group: u8) -> Common {
        Common::new(self.muid, destination, address, group).with_version(self.version)
    }

    /// Envelope answering `to`: same address and group, back to its source.
    pub fn reply_common(&self, to: &Common) -> Common {
        self.common(to.source, to.address, to.group)
    }

    pub fn next_request_id(&self) -> u8 {
        self.request_ids.next()
    }

    /// Encodes `message` and hands it to the transport.
    pub fn send(&mut self, message: Message) -> Result<(), CiError> {
        let group = message.common().group;
        let bytes = encode_into(&message, &mut self.buffer)?;
        trace!(
            kind = ?message.message_type(),
            to = %message.common().destination,
            group,
            len = bytes.len(),
            "MIDI-CI send"
        );
        self.transport.send_output(group, bytes);
        self.events.publish(&CiEvent::MessageSent(message));
        Ok(())
    }

    /// Sends a Property Exchange header and wire body as one or more chunks.
    ///
    /// Chunks are also capped so that each packet fits the send buffer.
    pub fn send_property(
        &mut self,
        wrap: fn(PropertyChunk) -> Message,
        common: Common,
        request_id: u8,
        header: &PropertyHeader,
        body: &[u8],
        max_chunk_size: usize,
    ) -> Result<(), CiError> {
        let header = header.to_bytes()?;
        let room = self
            .buffer
            .len()
            .saturating_sub(MessageType::GetPropertyData.min_length() + header.len());
        let size = max_chunk_size.min(room).max(1);
        for chunk in split_into_chunks(common, request_id, &header, body, size)? {
            self.send(wrap(chunk))?;
        }
        Ok(())
    }

    /// Sends a NAK answering a message with envelope `to`.
    pub fn send_nak(
        &mut self,
        to: &Common,
        original_sub_id2: u8,
        status: NakStatus,
        text: &str,
    ) -> Result<(), CiError> {
        let common = self.reply_common(to);
        self.send(Message::Nak(Acknowledge {
            common,
            original_sub_id2,
            status_code: status as u8,
            status_data: 0,
            details: [0; 5],
            message: text.to_string(),
        }))
    }

    /// Sends one MIDI message of a MIDI Message Report.
    pub fn send_midi(&mut self, group: u8, bytes: &[u8]) {
        trace!(group, len = bytes.len(), "MIDI report message send");
        self.transport.send_midi_message(group, bytes);
    }

    pub fn publish(&mut self, event: CiEvent) {
        self.events.publish(&event);
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }
}

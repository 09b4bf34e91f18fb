//! Binary codec for MIDI-CI System Exclusive payloads.
//!
//! Wire format (the F0/F7 framing bytes are not part of the payload):
//! ```text
//! [0x7E][address:1][0x0D][sub_id2:1][version:1][source:4][destination:4][body:N]
//! ```
//! The common header is 13 bytes.  Body offsets below are absolute, i.e.
//! counted from the 0x7E marker, which is how the MIDI-CI tables list them.
//!
//! Decoders never index past the end of the input: every read goes through
//! the checked helpers in [`super::packing`], so a truncated or lying peer
//! produces a [`ProtocolError`] instead of a panic.

use thiserror::Error;

use crate::domain::device::DeviceDetails;
use crate::domain::muid::{Address, Muid};
use crate::domain::profile::{ProfileId, PROFILE_ID_SIZE};
use crate::protocol::messages::{
    Acknowledge, Common, DiscoveryInquiry, DiscoveryReply, EndpointInquiry, EndpointReply,
    InvalidateMuid, Message, MessageType, MidiMessageReport, MidiMessageReportReply,
    ProcessInquiryReply, ProfileChannels, ProfileDetailsInquiry, ProfileDetailsReply,
    ProfileReply, ProfileReport, ProfileSpecificData, PropertyCapabilities, PropertyChunk,
    COMMON_HEADER_SIZE, SUB_ID1_MIDI_CI, UNIVERSAL_SYSEX,
};
use crate::protocol::packing::{
    push_14bit, push_28bit, read_14bit, read_28bit, read_direct, read_u8, slice,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the message kind requires.
    #[error("insufficient data for {kind}: need at least {needed} bytes, got {available}")]
    InsufficientData {
        kind: String,
        needed: usize,
        available: usize,
    },

    /// The bytes are not a Universal SysEx MIDI-CI message.
    #[error("not a MIDI-CI message")]
    NotMidiCi,

    /// The sub-ID #2 byte is not a recognized message kind.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// A field does not fit its wire width (or a data byte is not 7-bit).
    #[error("{field} value {value} exceeds maximum {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// The caller-provided output buffer cannot hold the encoded message.
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// The payload is internally inconsistent.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// The common header of a message whose kind may not be known.
///
/// The engine decodes this first so it can address a NAK even when the rest
/// of the message is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub sub_id2: u8,
    pub common: Common,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a freshly allocated SysEx payload.
///
/// # Errors
///
/// Returns [`ProtocolError::ValueOutOfRange`] if a length or count does not
/// fit its packed width, or if a data field contains a byte above 0x7F.
///
/// # Examples
///
/// ```rust
/// use midi_ci_core::protocol::{decode_message, encode_message, Common, Message};
/// use midi_ci_core::{Address, Muid};
///
/// let common = Common::new(Muid::new(0x10).unwrap(), Muid::BROADCAST, Address::FUNCTION_BLOCK, 0);
/// let msg = Message::ProfileInquiry(common);
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(bytes.len(), 13);
/// assert_eq!(decode_message(0, &bytes).unwrap(), msg);
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(msg.message_type().min_length());
    write_header(&mut buf, msg.message_type(), msg.common());
    encode_body(&mut buf, msg)?;
    Ok(buf)
}

/// Encodes a [`Message`] into `out` and returns the used prefix.
///
/// `out` is normally sized to the negotiated maximum SysEx size; nothing
/// beyond the returned slice is meaningful.
///
/// # Errors
///
/// Returns [`ProtocolError::BufferTooSmall`] if the message does not fit,
/// plus every error [`encode_message`] can return.
pub fn encode_into<'a>(msg: &Message, out: &'a mut [u8]) -> Result<&'a [u8], ProtocolError> {
    let bytes = encode_message(msg)?;
    if bytes.len() > out.len() {
        return Err(ProtocolError::BufferTooSmall {
            needed: bytes.len(),
            available: out.len(),
        });
    }
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(&out[..bytes.len()])
}

/// Decodes the 13-byte common header without looking at the body.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] for fewer than 13 bytes,
/// [`ProtocolError::NotMidiCi`] if the markers do not match.
pub fn decode_header(group: u8, bytes: &[u8]) -> Result<RawHeader, ProtocolError> {
    if bytes.len() < COMMON_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            kind: "common header".to_string(),
            needed: COMMON_HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[0] != UNIVERSAL_SYSEX || bytes[2] != SUB_ID1_MIDI_CI {
        return Err(ProtocolError::NotMidiCi);
    }
    let common = Common {
        source: read_muid(bytes, 5)?,
        destination: read_muid(bytes, 9)?,
        address: Address(bytes[1]),
        group,
        version: bytes[4],
    };
    Ok(RawHeader {
        sub_id2: bytes[3],
        common,
    })
}

/// Decodes one MIDI-CI message received on `group`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are not MIDI-CI, name an unknown
/// kind, or are shorter than the kind (or its embedded lengths) require.
pub fn decode_message(group: u8, bytes: &[u8]) -> Result<Message, ProtocolError> {
    let header = decode_header(group, bytes)?;
    let kind = MessageType::try_from(header.sub_id2)
        .map_err(|_| ProtocolError::UnknownMessageType(header.sub_id2))?;
    require_len(bytes, kind.min_length(), kind)?;
    decode_body(kind, header.common, bytes)
}

// ── Encoding ──────────────────────────────────────────────────────────────────

fn write_header(buf: &mut Vec<u8>, kind: MessageType, common: &Common) {
    buf.push(UNIVERSAL_SYSEX);
    buf.push(common.address.0);
    buf.push(SUB_ID1_MIDI_CI);
    buf.push(kind as u8);
    buf.push(common.version);
    buf.extend_from_slice(&common.source.to_bytes());
    buf.extend_from_slice(&common.destination.to_bytes());
}

fn encode_body(buf: &mut Vec<u8>, msg: &Message) -> Result<(), ProtocolError> {
    match msg {
        Message::DiscoveryInquiry(m) => {
            encode_discovery(buf, &m.device, m.categories, m.max_sysex_size, m.output_path_id)
        }
        Message::DiscoveryReply(m) => {
            encode_discovery(buf, &m.device, m.categories, m.max_sysex_size, m.output_path_id)?;
            buf.push(m.function_block & 0x7F);
            Ok(())
        }
        Message::EndpointInquiry(m) => {
            buf.push(m.status & 0x7F);
            Ok(())
        }
        Message::EndpointReply(m) => {
            buf.push(m.status & 0x7F);
            push_data_14(buf, &m.data, "endpoint data")
        }
        Message::InvalidateMuid(m) => {
            buf.extend_from_slice(&m.target.to_bytes());
            Ok(())
        }
        Message::Ack(m) | Message::Nak(m) => encode_acknowledge(buf, m),
        Message::ProfileInquiry(_)
        | Message::ProcessInquiryCapabilities(_)
        | Message::EndOfMidiMessageReport(_) => Ok(()),
        Message::ProfileReply(m) => {
            push_profile_ids(buf, &m.enabled)?;
            push_profile_ids(buf, &m.disabled)
        }
        Message::ProfileAdded(m) | Message::ProfileRemoved(m) => push_profile_id(buf, &m.profile),
        Message::SetProfileOn(m) | Message::ProfileEnabled(m) | Message::ProfileDisabled(m) => {
            push_profile_id(buf, &m.profile)?;
            push_14bit(buf, u32::from(m.num_channels), "numChannels")
        }
        Message::SetProfileOff(m) => {
            push_profile_id(buf, &m.profile)?;
            buf.extend_from_slice(&[0, 0]); // reserved
            Ok(())
        }
        Message::ProfileDetailsInquiry(m) => {
            push_profile_id(buf, &m.profile)?;
            buf.push(m.target & 0x7F);
            Ok(())
        }
        Message::ProfileDetailsReply(m) => {
            push_profile_id(buf, &m.profile)?;
            buf.push(m.target & 0x7F);
            push_data_14(buf, &m.data, "profile details data")
        }
        Message::ProfileSpecificData(m) => {
            push_profile_id(buf, &m.profile)?;
            check_seven_bit("profile specific data", &m.data)?;
            push_28bit(buf, len_u32(m.data.len()), "profile specific data length")?;
            buf.extend_from_slice(&m.data);
            Ok(())
        }
        Message::PropertyCapabilities(m) | Message::PropertyCapabilitiesReply(m) => {
            buf.push(m.max_simultaneous_requests & 0x7F);
            buf.push(m.major_version & 0x7F);
            buf.push(m.minor_version & 0x7F);
            Ok(())
        }
        Message::GetPropertyData(m)
        | Message::GetPropertyDataReply(m)
        | Message::SetPropertyData(m)
        | Message::SetPropertyDataReply(m)
        | Message::SubscribeProperty(m)
        | Message::SubscribePropertyReply(m)
        | Message::PropertyNotify(m) => encode_property_chunk(buf, m),
        Message::ProcessInquiryCapabilitiesReply(m) => {
            buf.push(m.supported_features & 0x7F);
            Ok(())
        }
        Message::MidiMessageReport(m) => {
            buf.push(m.message_data_control & 0x7F);
            buf.push(m.system_messages & 0x7F);
            buf.push(0); // reserved
            buf.push(m.channel_controller_messages & 0x7F);
            buf.push(m.note_data_messages & 0x7F);
            Ok(())
        }
        Message::MidiMessageReportReply(m) => {
            buf.push(m.system_messages & 0x7F);
            buf.push(0); // reserved
            buf.push(m.channel_controller_messages & 0x7F);
            buf.push(m.note_data_messages & 0x7F);
            Ok(())
        }
    }
}

fn encode_discovery(
    buf: &mut Vec<u8>,
    device: &DeviceDetails,
    categories: u8,
    max_sysex_size: u32,
    output_path_id: u8,
) -> Result<(), ProtocolError> {
    buf.extend_from_slice(&device.manufacturer_bytes());
    buf.extend_from_slice(&device.family_bytes());
    buf.extend_from_slice(&device.model_bytes());
    buf.extend_from_slice(&device.software_revision_bytes());
    buf.push(categories & 0x7F);
    push_28bit(buf, max_sysex_size, "maxSysexSize")?;
    buf.push(output_path_id & 0x7F);
    Ok(())
}

fn encode_acknowledge(buf: &mut Vec<u8>, m: &Acknowledge) -> Result<(), ProtocolError> {
    buf.push(m.original_sub_id2 & 0x7F);
    buf.push(m.status_code & 0x7F);
    buf.push(m.status_data & 0x7F);
    buf.extend(m.details.iter().map(|b| b & 0x7F));
    let text = ascii_lossy(&m.message);
    push_14bit(buf, len_u32(text.len()), "message length")?;
    buf.extend_from_slice(&text);
    Ok(())
}

fn encode_property_chunk(buf: &mut Vec<u8>, m: &PropertyChunk) -> Result<(), ProtocolError> {
    buf.push(m.request_id & 0x7F);
    push_data_14(buf, &m.header, "header")?;
    push_14bit(buf, u32::from(m.num_chunks), "numChunks")?;
    push_14bit(buf, u32::from(m.chunk_index), "chunkIndex")?;
    push_data_14(buf, &m.body, "body")
}

fn push_profile_id(buf: &mut Vec<u8>, id: &ProfileId) -> Result<(), ProtocolError> {
    check_seven_bit("profile id", id.as_bytes())?;
    buf.extend_from_slice(id.as_bytes());
    Ok(())
}

fn push_profile_ids(buf: &mut Vec<u8>, ids: &[ProfileId]) -> Result<(), ProtocolError> {
    push_14bit(buf, len_u32(ids.len()), "profile count")?;
    for id in ids {
        push_profile_id(buf, id)?;
    }
    Ok(())
}

/// Appends a 14-bit length followed by the (7-bit clean) data.
fn push_data_14(buf: &mut Vec<u8>, data: &[u8], field: &'static str) -> Result<(), ProtocolError> {
    check_seven_bit(field, data)?;
    push_14bit(buf, len_u32(data.len()), field)?;
    buf.extend_from_slice(data);
    Ok(())
}

fn check_seven_bit(field: &'static str, data: &[u8]) -> Result<(), ProtocolError> {
    match data.iter().find(|b| **b > 0x7F) {
        Some(b) => Err(ProtocolError::ValueOutOfRange {
            field,
            value: u64::from(*b),
            max: 0x7F,
        }),
        None => Ok(()),
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Free text in ACK/NAK is 7-bit ASCII; anything else becomes `?`.
fn ascii_lossy(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn decode_body(kind: MessageType, common: Common, p: &[u8]) -> Result<Message, ProtocolError> {
    let msg = match kind {
        MessageType::DiscoveryInquiry => {
            let (device, categories, max_sysex_size, output_path_id) = decode_discovery(p)?;
            Message::DiscoveryInquiry(DiscoveryInquiry {
                common,
                device,
                categories,
                max_sysex_size,
                output_path_id,
            })
        }
        MessageType::DiscoveryReply => {
            let (device, categories, max_sysex_size, output_path_id) = decode_discovery(p)?;
            Message::DiscoveryReply(DiscoveryReply {
                common,
                device,
                categories,
                max_sysex_size,
                output_path_id,
                function_block: read_u8(p, 30, "DiscoveryReply.functionBlock")?,
            })
        }
        MessageType::EndpointInquiry => Message::EndpointInquiry(EndpointInquiry {
            common,
            status: read_u8(p, 13, "EndpointInquiry.status")?,
        }),
        MessageType::EndpointReply => Message::EndpointReply(EndpointReply {
            common,
            status: read_u8(p, 13, "EndpointReply.status")?,
            data: read_data_14(p, 14, "EndpointReply.data")?.0,
        }),
        MessageType::InvalidateMuid => Message::InvalidateMuid(InvalidateMuid {
            common,
            target: read_muid(p, 13)?,
        }),
        MessageType::Ack => Message::Ack(decode_acknowledge(common, p)?),
        MessageType::Nak => Message::Nak(decode_acknowledge(common, p)?),
        MessageType::ProfileInquiry => Message::ProfileInquiry(common),
        MessageType::ProfileReply => {
            let (enabled, next) = read_profile_ids(p, 13)?;
            let (disabled, _) = read_profile_ids(p, next)?;
            Message::ProfileReply(ProfileReply {
                common,
                enabled,
                disabled,
            })
        }
        MessageType::ProfileAdded => Message::ProfileAdded(ProfileReport {
            common,
            profile: read_profile_id(p, 13)?,
        }),
        MessageType::ProfileRemoved => Message::ProfileRemoved(ProfileReport {
            common,
            profile: read_profile_id(p, 13)?,
        }),
        MessageType::SetProfileOn => Message::SetProfileOn(decode_profile_channels(common, p)?),
        MessageType::SetProfileOff => {
            let mut m = decode_profile_channels(common, p)?;
            m.num_channels = 0;
            Message::SetProfileOff(m)
        }
        MessageType::ProfileEnabled => Message::ProfileEnabled(decode_profile_channels(common, p)?),
        MessageType::ProfileDisabled => {
            Message::ProfileDisabled(decode_profile_channels(common, p)?)
        }
        MessageType::ProfileDetailsInquiry => {
            Message::ProfileDetailsInquiry(ProfileDetailsInquiry {
                common,
                profile: read_profile_id(p, 13)?,
                target: read_u8(p, 18, "ProfileDetailsInquiry.target")?,
            })
        }
        MessageType::ProfileDetailsReply => Message::ProfileDetailsReply(ProfileDetailsReply {
            common,
            profile: read_profile_id(p, 13)?,
            target: read_u8(p, 18, "ProfileDetailsReply.target")?,
            data: read_data_14(p, 19, "ProfileDetailsReply.data")?.0,
        }),
        MessageType::ProfileSpecificData => {
            let profile = read_profile_id(p, 13)?;
            let len = read_28bit(p, 18, "ProfileSpecificData.length")? as usize;
            let data = slice(p, 22, len, "ProfileSpecificData.data")?.to_vec();
            Message::ProfileSpecificData(ProfileSpecificData {
                common,
                profile,
                data,
            })
        }
        MessageType::PropertyCapabilities => {
            Message::PropertyCapabilities(decode_property_capabilities(common, p)?)
        }
        MessageType::PropertyCapabilitiesReply => {
            Message::PropertyCapabilitiesReply(decode_property_capabilities(common, p)?)
        }
        MessageType::GetPropertyData => Message::GetPropertyData(decode_property_chunk(common, p)?),
        MessageType::GetPropertyDataReply => {
            Message::GetPropertyDataReply(decode_property_chunk(common, p)?)
        }
        MessageType::SetPropertyData => Message::SetPropertyData(decode_property_chunk(common, p)?),
        MessageType::SetPropertyDataReply => {
            Message::SetPropertyDataReply(decode_property_chunk(common, p)?)
        }
        MessageType::SubscribeProperty => {
            Message::SubscribeProperty(decode_property_chunk(common, p)?)
        }
        MessageType::SubscribePropertyReply => {
            Message::SubscribePropertyReply(decode_property_chunk(common, p)?)
        }
        MessageType::PropertyNotify => Message::PropertyNotify(decode_property_chunk(common, p)?),
        MessageType::ProcessInquiryCapabilities => Message::ProcessInquiryCapabilities(common),
        MessageType::ProcessInquiryCapabilitiesReply => {
            Message::ProcessInquiryCapabilitiesReply(ProcessInquiryReply {
                common,
                supported_features: read_u8(p, 13, "ProcessInquiryReply.features")?,
            })
        }
        MessageType::MidiMessageReport => Message::MidiMessageReport(MidiMessageReport {
            common,
            message_data_control: read_u8(p, 13, "MidiMessageReport.control")?,
            system_messages: read_u8(p, 14, "MidiMessageReport.system")?,
            channel_controller_messages: read_u8(p, 16, "MidiMessageReport.channelController")?,
            note_data_messages: read_u8(p, 17, "MidiMessageReport.noteData")?,
        }),
        MessageType::MidiMessageReportReply => {
            Message::MidiMessageReportReply(MidiMessageReportReply {
                common,
                system_messages: read_u8(p, 13, "MidiMessageReportReply.system")?,
                channel_controller_messages: read_u8(
                    p,
                    15,
                    "MidiMessageReportReply.channelController",
                )?,
                note_data_messages: read_u8(p, 16, "MidiMessageReportReply.noteData")?,
            })
        }
        MessageType::EndOfMidiMessageReport => Message::EndOfMidiMessageReport(common),
    };
    Ok(msg)
}

fn decode_discovery(p: &[u8]) -> Result<(DeviceDetails, u8, u32, u8), ProtocolError> {
    let device = DeviceDetails::new(
        read_direct(p, 13, 3, "Discovery.manufacturer")?,
        read_direct(p, 16, 2, "Discovery.family")? as u16,
        read_direct(p, 18, 2, "Discovery.model")? as u16,
        read_direct(p, 20, 4, "Discovery.softwareRevision")?,
    );
    let categories = read_u8(p, 24, "Discovery.categories")?;
    let max_sysex_size = read_28bit(p, 25, "Discovery.maxSysexSize")?;
    let output_path_id = read_u8(p, 29, "Discovery.outputPathId")?;
    Ok((device, categories, max_sysex_size, output_path_id))
}

fn decode_acknowledge(common: Common, p: &[u8]) -> Result<Acknowledge, ProtocolError> {
    // MIDI-CI 1.1 NAK: header only
    if p.len() == COMMON_HEADER_SIZE {
        return Ok(Acknowledge {
            common,
            original_sub_id2: 0,
            status_code: 0,
            status_data: 0,
            details: [0; 5],
            message: String::new(),
        });
    }
    let mut details = [0u8; 5];
    details.copy_from_slice(slice(p, 16, 5, "Acknowledge.details")?);
    let (text, _) = read_data_14(p, 21, "Acknowledge.message")?;
    Ok(Acknowledge {
        common,
        original_sub_id2: read_u8(p, 13, "Acknowledge.originalSubId2")?,
        status_code: read_u8(p, 14, "Acknowledge.statusCode")?,
        status_data: read_u8(p, 15, "Acknowledge.statusData")?,
        details,
        message: text.iter().map(|b| char::from(b & 0x7F)).collect(),
    })
}

fn decode_profile_channels(common: Common, p: &[u8]) -> Result<ProfileChannels, ProtocolError> {
    Ok(ProfileChannels {
        common,
        profile: read_profile_id(p, 13)?,
        num_channels: read_14bit(p, 18, "Profile.numChannels")? as u16,
    })
}

fn decode_property_capabilities(
    common: Common,
    p: &[u8],
) -> Result<PropertyCapabilities, ProtocolError> {
    // MIDI-CI 1.1 omits the version bytes; treat them as 0.0
    Ok(PropertyCapabilities {
        common,
        max_simultaneous_requests: read_u8(p, 13, "PropertyCapabilities.maxSimultaneous")?,
        major_version: p.get(14).copied().unwrap_or(0),
        minor_version: p.get(15).copied().unwrap_or(0),
    })
}

fn decode_property_chunk(common: Common, p: &[u8]) -> Result<PropertyChunk, ProtocolError> {
    let request_id = read_u8(p, 13, "Property.requestId")?;
    let (header, off) = read_data_14(p, 14, "Property.header")?;
    let num_chunks = read_14bit(p, off, "Property.numChunks")? as u16;
    let chunk_index = read_14bit(p, off + 2, "Property.chunkIndex")? as u16;
    let (body, _) = read_data_14(p, off + 4, "Property.body")?;
    Ok(PropertyChunk {
        common,
        request_id,
        header,
        num_chunks,
        chunk_index,
        body,
    })
}

fn read_profile_id(p: &[u8], offset: usize) -> Result<ProfileId, ProtocolError> {
    let mut id = [0u8; PROFILE_ID_SIZE];
    id.copy_from_slice(slice(p, offset, PROFILE_ID_SIZE, "ProfileId")?);
    Ok(ProfileId(id))
}

fn read_profile_ids(p: &[u8], offset: usize) -> Result<(Vec<ProfileId>, usize), ProtocolError> {
    let count = read_14bit(p, offset, "Profile.count")? as usize;
    let start = offset + 2;
    // Check the whole run up front so a huge count cannot drive allocation.
    slice(p, start, count * PROFILE_ID_SIZE, "Profile.ids")?;
    let ids = (0..count)
        .map(|i| read_profile_id(p, start + i * PROFILE_ID_SIZE))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((ids, start + count * PROFILE_ID_SIZE))
}

/// Reads a 14-bit length at `offset` and the data that follows it.
/// Returns the data and the offset just past it.
fn read_data_14(p: &[u8], offset: usize, context: &str) -> Result<(Vec<u8>, usize), ProtocolError> {
    let len = read_14bit(p, offset, context)? as usize;
    let data = slice(p, offset + 2, len, context)?.to_vec();
    Ok((data, offset + 2 + len))
}

fn read_muid(p: &[u8], offset: usize) -> Result<Muid, ProtocolError> {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(slice(p, offset, 4, "MUID")?);
    Ok(Muid::from_bytes(bytes))
}

fn require_len(buf: &[u8], needed: usize, kind: MessageType) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::InsufficientData {
            kind: format!("{kind:?}"),
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{NakStatus, CI_VERSION_1_2};

    fn common() -> Common {
        Common::new(
            Muid::new(0x10).unwrap(),
            Muid::new(0x20).unwrap(),
            Address::FUNCTION_BLOCK,
            0,
        )
    }

    fn round_trip(msg: &Message) -> Message {
        let bytes = encode_message(msg).expect("encode failed");
        decode_message(msg.common().group, &bytes).expect("decode failed")
    }

    #[test]
    fn test_header_layout() {
        // Arrange
        let msg = Message::ProfileInquiry(common());

        // Act
        let bytes = encode_message(&msg).unwrap();

        // Assert
        assert_eq!(
            bytes,
            vec![0x7E, 0x7F, 0x0D, 0x10, CI_VERSION_1_2, 0x10, 0, 0, 0, 0x20, 0, 0, 0]
        );
    }

    #[test]
    fn test_discovery_inquiry_offsets() {
        // Arrange
        let msg = Message::DiscoveryInquiry(DiscoveryInquiry {
            common: Common::new(Muid::new(0x10).unwrap(), Muid::BROADCAST, Address::FUNCTION_BLOCK, 0),
            device: DeviceDetails::new(0x030201, 0x0504, 0x0706, 0x0B0A_0908),
            categories: 0x1C,
            max_sysex_size: 4096,
            output_path_id: 0,
        });

        // Act
        let bytes = encode_message(&msg).unwrap();

        // Assert
        assert_eq!(bytes.len(), 30);
        assert_eq!(&bytes[9..13], &[0x7F; 4]);
        assert_eq!(&bytes[13..16], &[1, 2, 3]);
        assert_eq!(&bytes[16..18], &[4, 5]);
        assert_eq!(&bytes[18..20], &[6, 7]);
        assert_eq!(&bytes[20..24], &[8, 9, 10, 11]);
        assert_eq!(bytes[24], 0x1C);
        assert_eq!(&bytes[25..29], &[0x00, 0x20, 0x00, 0x00]);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_discovery_reply_round_trip() {
        let msg = Message::DiscoveryReply(DiscoveryReply {
            common: common(),
            device: DeviceDetails::new(0x7D, 1, 2, 3),
            categories: 0x0C,
            max_sysex_size: 512,
            output_path_id: 1,
            function_block: 0x7F,
        });
        assert_eq!(encode_message(&msg).unwrap().len(), 31);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_nak_round_trip_and_offsets() {
        // Arrange
        let msg = Message::Nak(Acknowledge {
            common: common(),
            original_sub_id2: 0x34,
            status_code: NakStatus::PropertyChunksOutOfSequence as u8,
            status_data: 0,
            details: [1, 2, 3, 4, 5],
            message: "out of order".to_string(),
        });

        // Act
        let bytes = encode_message(&msg).unwrap();

        // Assert
        assert_eq!(bytes[13], 0x34);
        assert_eq!(bytes[14], 0x21);
        assert_eq!(&bytes[16..21], &[1, 2, 3, 4, 5]);
        assert_eq!(bytes[21] as usize, "out of order".len());
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_ack_message_text_is_ascii_lossy() {
        let msg = Message::Ack(Acknowledge {
            common: common(),
            original_sub_id2: 0x12,
            status_code: 0,
            status_data: 0,
            details: [0; 5],
            message: "café".to_string(),
        });
        match round_trip(&msg) {
            Message::Ack(m) => assert_eq!(m.message, "caf?"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_legacy_header_only_nak_decodes() {
        let mut bytes = encode_message(&Message::ProfileInquiry(common())).unwrap();
        bytes[3] = 0x7F;
        bytes[4] = 0x01;
        let msg = decode_message(0, &bytes).unwrap();
        assert!(matches!(msg, Message::Nak(ref m) if m.status_code == 0));
    }

    #[test]
    fn test_profile_reply_round_trip() {
        let msg = Message::ProfileReply(ProfileReply {
            common: common(),
            enabled: vec![ProfileId::standard(0, 1, 1, 1)],
            disabled: vec![ProfileId::standard(0, 2, 1, 1), ProfileId([0x7D, 0, 0, 1, 2])],
        });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes.len(), 13 + 2 + 5 + 2 + 10);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_set_profile_off_writes_reserved_zero() {
        let msg = Message::SetProfileOff(ProfileChannels {
            common: common(),
            profile: ProfileId::standard(0, 1, 1, 1),
            num_channels: 0,
        });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(&bytes[18..20], &[0, 0]);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_property_chunk_offsets() {
        // Arrange
        let msg = Message::GetPropertyData(PropertyChunk {
            common: common(),
            request_id: 5,
            header: br#"{"resource":"DeviceInfo"}"#.to_vec(),
            num_chunks: 1,
            chunk_index: 1,
            body: Vec::new(),
        });

        // Act
        let bytes = encode_message(&msg).unwrap();

        // Assert
        let header_len = 25;
        assert_eq!(bytes[13], 5);
        assert_eq!(bytes[14] as usize, header_len);
        let after = 16 + header_len;
        assert_eq!(&bytes[after..after + 6], &[1, 0, 1, 0, 0, 0]);
        assert_eq!(bytes.len(), after + 6);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_property_chunk_rejects_eight_bit_body() {
        let msg = Message::SetPropertyData(PropertyChunk {
            common: common(),
            request_id: 1,
            header: b"{}".to_vec(),
            num_chunks: 1,
            chunk_index: 1,
            body: vec![0x80],
        });
        assert!(matches!(
            encode_message(&msg),
            Err(ProtocolError::ValueOutOfRange { field: "body", .. })
        ));
    }

    #[test]
    fn test_midi_message_report_reserved_byte_is_skipped() {
        let msg = Message::MidiMessageReport(MidiMessageReport {
            common: common(),
            message_data_control: 0x7F,
            system_messages: 0x07,
            channel_controller_messages: 0x3F,
            note_data_messages: 0x0F,
        });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(&bytes[13..18], &[0x7F, 0x07, 0x00, 0x3F, 0x0F]);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_encode_into_returns_used_prefix_only() {
        // Arrange
        let msg = Message::EndpointInquiry(EndpointInquiry {
            common: common(),
            status: 0,
        });
        let mut out = [0xAAu8; 64];

        // Act
        let used = encode_into(&msg, &mut out).unwrap();

        // Assert
        assert_eq!(used.len(), 14);
        assert_eq!(used[13], 0);
    }

    #[test]
    fn test_encode_into_small_buffer_fails() {
        let mut out = [0u8; 8];
        let result = encode_into(&Message::ProfileInquiry(common()), &mut out);
        assert_eq!(
            result,
            Err(ProtocolError::BufferTooSmall {
                needed: 13,
                available: 8
            })
        );
    }

    #[test]
    fn test_decode_short_buffer_returns_insufficient_data() {
        assert!(matches!(
            decode_message(0, &[0x7E, 0x7F, 0x0D]),
            Err(ProtocolError::InsufficientData { needed: 13, .. })
        ));
    }

    #[test]
    fn test_decode_non_ci_sysex_is_rejected() {
        let mut bytes = encode_message(&Message::ProfileInquiry(common())).unwrap();
        bytes[2] = 0x06; // General Information
        assert_eq!(decode_message(0, &bytes), Err(ProtocolError::NotMidiCi));
    }

    #[test]
    fn test_decode_unknown_sub_id2() {
        let mut bytes = encode_message(&Message::ProfileInquiry(common())).unwrap();
        bytes[3] = 0x50;
        assert_eq!(
            decode_message(0, &bytes),
            Err(ProtocolError::UnknownMessageType(0x50))
        );
    }

    #[test]
    fn test_decode_truncated_kind_returns_error() {
        let msg = Message::DiscoveryReply(DiscoveryReply {
            common: common(),
            device: DeviceDetails::default(),
            categories: 0,
            max_sysex_size: 0,
            output_path_id: 0,
            function_block: 0,
        });
        let bytes = encode_message(&msg).unwrap();
        assert!(matches!(
            decode_message(0, &bytes[..25]),
            Err(ProtocolError::InsufficientData { needed: 31, .. })
        ));
    }

    #[test]
    fn test_decode_lying_body_length_returns_error() {
        // Arrange – claim a 100-byte body but supply none
        let msg = Message::GetPropertyDataReply(PropertyChunk {
            common: common(),
            request_id: 1,
            header: b"{}".to_vec(),
            num_chunks: 1,
            chunk_index: 1,
            body: Vec::new(),
        });
        let mut bytes = encode_message(&msg).unwrap();
        let len_at = bytes.len() - 2;
        bytes[len_at] = 100;

        // Act / Assert
        assert!(matches!(
            decode_message(0, &bytes),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_keeps_group_and_version() {
        let c = common().with_version(0x01);
        let bytes = encode_message(&Message::ProfileInquiry(c)).unwrap();
        let header = decode_header(9, &bytes).unwrap();
        assert_eq!(header.common.group, 9);
        assert_eq!(header.common.version, 0x01);
        assert_eq!(header.sub_id2, 0x10);
    }
}

//! All MIDI-CI message types.
//!
//! Every message shares the [`Common`] envelope (source and destination MUID,
//! address byte, group).  The kind-specific fields live in one payload struct
//! per message family; the closed [`Message`] enum ties them together so the
//! dispatcher can match exhaustively.

use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceDetails;
use crate::domain::muid::{Address, Muid};
use crate::domain::profile::ProfileId;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Universal Non-Real-Time SysEx id, the first byte of every message.
pub const UNIVERSAL_SYSEX: u8 = 0x7E;

/// Sub-ID #1 for MIDI-CI.
pub const SUB_ID1_MIDI_CI: u8 = 0x0D;

/// Message format version for MIDI-CI 1.1.
pub const CI_VERSION_1_1: u8 = 0x01;

/// Message format version for MIDI-CI 1.2, the version this crate speaks.
pub const CI_VERSION_1_2: u8 = 0x02;

/// Size of the header every message starts with.
pub const COMMON_HEADER_SIZE: usize = 13;

/// Longest product instance id allowed in an Endpoint Reply.
pub const PRODUCT_INSTANCE_ID_MAX_LEN: usize = 16;

/// Endpoint Inquiry status asking for the product instance id.
pub const ENDPOINT_STATUS_PRODUCT_INSTANCE_ID: u8 = 0x00;

/// Bits of the "Capability Inquiry Category Supported" field of Discovery.
pub mod categories {
    pub const PROTOCOL_NEGOTIATION: u8 = 1 << 1;
    pub const PROFILE_CONFIGURATION: u8 = 1 << 2;
    pub const PROPERTY_EXCHANGE: u8 = 1 << 3;
    pub const PROCESS_INQUIRY: u8 = 1 << 4;
}

/// Bitmaps and controls of Process Inquiry MIDI Message Report.
pub mod report {
    /// Process Inquiry Capabilities: MIDI Message Report supported.
    pub const FEATURE_MIDI_MESSAGE_REPORT: u8 = 1 << 0;

    pub const DATA_CONTROL_NONE: u8 = 0x00;
    pub const DATA_CONTROL_NON_DEFAULT_ONLY: u8 = 0x01;
    pub const DATA_CONTROL_FULL: u8 = 0x7F;

    pub const SYSTEM_MTC_QUARTER_FRAME: u8 = 1 << 0;
    pub const SYSTEM_SONG_POSITION: u8 = 1 << 1;
    pub const SYSTEM_SONG_SELECT: u8 = 1 << 2;

    pub const CHANNEL_PITCHBEND: u8 = 1 << 0;
    pub const CHANNEL_CONTROL_CHANGE: u8 = 1 << 1;
    pub const CHANNEL_RPN: u8 = 1 << 2;
    pub const CHANNEL_NRPN: u8 = 1 << 3;
    pub const CHANNEL_PROGRAM_CHANGE: u8 = 1 << 4;
    pub const CHANNEL_PRESSURE: u8 = 1 << 5;

    pub const NOTE_NOTES: u8 = 1 << 0;
    pub const NOTE_POLY_PRESSURE: u8 = 1 << 1;
    pub const NOTE_PER_NOTE_CONTROLLERS: u8 = 1 << 2;
    pub const NOTE_PER_NOTE_PITCHBEND: u8 = 1 << 3;
}

// ── Message type codes ────────────────────────────────────────────────────────

/// Sub-ID #2 values of every message kind this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Profile Configuration (0x10–0x2F)
    ProfileInquiry = 0x10,
    ProfileReply = 0x11,
    SetProfileOn = 0x12,
    SetProfileOff = 0x13,
    ProfileEnabled = 0x14,
    ProfileDisabled = 0x15,
    ProfileAdded = 0x16,
    ProfileRemoved = 0x17,
    ProfileDetailsInquiry = 0x20,
    ProfileDetailsReply = 0x21,
    ProfileSpecificData = 0x2F,
    // Property Exchange (0x30–0x3F)
    PropertyCapabilities = 0x30,
    PropertyCapabilitiesReply = 0x31,
    GetPropertyData = 0x34,
    GetPropertyDataReply = 0x35,
    SetPropertyData = 0x36,
    SetPropertyDataReply = 0x37,
    SubscribeProperty = 0x38,
    SubscribePropertyReply = 0x39,
    PropertyNotify = 0x3F,
    // Process Inquiry (0x40–0x4F)
    ProcessInquiryCapabilities = 0x40,
    ProcessInquiryCapabilitiesReply = 0x41,
    MidiMessageReport = 0x42,
    MidiMessageReportReply = 0x43,
    EndOfMidiMessageReport = 0x44,
    // Management (0x70–0x7F)
    DiscoveryInquiry = 0x70,
    DiscoveryReply = 0x71,
    EndpointInquiry = 0x72,
    EndpointReply = 0x73,
    Ack = 0x7D,
    InvalidateMuid = 0x7E,
    Nak = 0x7F,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x10 => Ok(MessageType::ProfileInquiry),
            0x11 => Ok(MessageType::ProfileReply),
            0x12 => Ok(MessageType::SetProfileOn),
            0x13 => Ok(MessageType::SetProfileOff),
            0x14 => Ok(MessageType::ProfileEnabled),
            0x15 => Ok(MessageType::ProfileDisabled),
            0x16 => Ok(MessageType::ProfileAdded),
            0x17 => Ok(MessageType::ProfileRemoved),
            0x20 => Ok(MessageType::ProfileDetailsInquiry),
            0x21 => Ok(MessageType::ProfileDetailsReply),
            0x2F => Ok(MessageType::ProfileSpecificData),
            0x30 => Ok(MessageType::PropertyCapabilities),
            0x31 => Ok(MessageType::PropertyCapabilitiesReply),
            0x34 => Ok(MessageType::GetPropertyData),
            0x35 => Ok(MessageType::GetPropertyDataReply),
            0x36 => Ok(MessageType::SetPropertyData),
            0x37 => Ok(MessageType::SetPropertyDataReply),
            0x38 => Ok(MessageType::SubscribeProperty),
            0x39 => Ok(MessageType::SubscribePropertyReply),
            0x3F => Ok(MessageType::PropertyNotify),
            0x40 => Ok(MessageType::ProcessInquiryCapabilities),
            0x41 => Ok(MessageType::ProcessInquiryCapabilitiesReply),
            0x42 => Ok(MessageType::MidiMessageReport),
            0x43 => Ok(MessageType::MidiMessageReportReply),
            0x44 => Ok(MessageType::EndOfMidiMessageReport),
            0x70 => Ok(MessageType::DiscoveryInquiry),
            0x71 => Ok(MessageType::DiscoveryReply),
            0x72 => Ok(MessageType::EndpointInquiry),
            0x73 => Ok(MessageType::EndpointReply),
            0x7D => Ok(MessageType::Ack),
            0x7E => Ok(MessageType::InvalidateMuid),
            0x7F => Ok(MessageType::Nak),
            _ => Err(()),
        }
    }
}

impl MessageType {
    /// Smallest number of bytes (including the common header) a message of
    /// this kind can occupy.  Variable-length kinds are checked again by
    /// their decoder once the embedded lengths are known.
    pub fn min_length(self) -> usize {
        match self {
            MessageType::ProfileInquiry
            | MessageType::ProcessInquiryCapabilities
            | MessageType::EndOfMidiMessageReport => COMMON_HEADER_SIZE,
            // MIDI-CI 1.1 NAKs carry no body
            MessageType::Nak => COMMON_HEADER_SIZE,
            MessageType::EndpointInquiry | MessageType::ProcessInquiryCapabilitiesReply => 14,
            // MIDI-CI 1.1 capabilities omit the version bytes
            MessageType::PropertyCapabilities | MessageType::PropertyCapabilitiesReply => 14,
            MessageType::EndpointReply => 16,
            MessageType::InvalidateMuid => 17,
            MessageType::ProfileReply => 17,
            MessageType::MidiMessageReportReply => 17,
            MessageType::ProfileAdded | MessageType::ProfileRemoved => 18,
            MessageType::MidiMessageReport => 18,
            MessageType::ProfileDetailsInquiry => 19,
            MessageType::SetProfileOn
            | MessageType::SetProfileOff
            | MessageType::ProfileEnabled
            | MessageType::ProfileDisabled => 20,
            MessageType::ProfileDetailsReply => 21,
            MessageType::ProfileSpecificData => 22,
            MessageType::GetPropertyData
            | MessageType::GetPropertyDataReply
            | MessageType::SetPropertyData
            | MessageType::SetPropertyDataReply
            | MessageType::SubscribeProperty
            | MessageType::SubscribePropertyReply
            | MessageType::PropertyNotify => 22,
            MessageType::Ack => 23,
            MessageType::DiscoveryInquiry => 30,
            MessageType::DiscoveryReply => 31,
        }
    }

    /// `true` for the seven chunked Property Exchange kinds.
    pub fn is_property_chunk(self) -> bool {
        matches!(
            self,
            MessageType::GetPropertyData
                | MessageType::GetPropertyDataReply
                | MessageType::SetPropertyData
                | MessageType::SetPropertyDataReply
                | MessageType::SubscribeProperty
                | MessageType::SubscribePropertyReply
                | MessageType::PropertyNotify
        )
    }
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// NAK status codes (MIDI-CI 1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NakStatus {
    Nak = 0x00,
    MessageNotSupported = 0x01,
    CiVersionNotSupported = 0x02,
    TargetNotInUse = 0x03,
    ProfileNotSupported = 0x04,
    TerminateInquiry = 0x20,
    PropertyChunksOutOfSequence = 0x21,
    ErrorRetrySuggested = 0x40,
    MalformedMessage = 0x41,
    Timeout = 0x42,
    TimeoutRetrySuggested = 0x43,
}

impl TryFrom<u8> for NakStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(NakStatus::Nak),
            0x01 => Ok(NakStatus::MessageNotSupported),
            0x02 => Ok(NakStatus::CiVersionNotSupported),
            0x03 => Ok(NakStatus::TargetNotInUse),
            0x04 => Ok(NakStatus::ProfileNotSupported),
            0x20 => Ok(NakStatus::TerminateInquiry),
            0x21 => Ok(NakStatus::PropertyChunksOutOfSequence),
            0x40 => Ok(NakStatus::ErrorRetrySuggested),
            0x41 => Ok(NakStatus::MalformedMessage),
            0x42 => Ok(NakStatus::Timeout),
            0x43 => Ok(NakStatus::TimeoutRetrySuggested),
            _ => Err(()),
        }
    }
}

/// ACK status: plain acknowledgement.
pub const ACK_STATUS_OK: u8 = 0x00;
/// ACK status: "busy, wait for the time in status data".
pub const ACK_STATUS_TIMEOUT_WAIT: u8 = 0x10;

// ── Common envelope ───────────────────────────────────────────────────────────

/// Fields shared by every MIDI-CI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Common {
    pub source: Muid,
    pub destination: Muid,
    pub address: Address,
    /// UMP group the message travels on; not part of the SysEx bytes.
    pub group: u8,
    /// Message format version byte.
    pub version: u8,
}

impl Common {
    pub fn new(source: Muid, destination: Muid, address: Address, group: u8) -> Self {
        Self {
            source,
            destination,
            address,
            group,
            version: CI_VERSION_1_2,
        }
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// Discovery Inquiry (0x70), normally sent to the broadcast MUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInquiry {
    pub common: Common,
    pub device: DeviceDetails,
    /// Bitmask of [`categories`].
    pub categories: u8,
    pub max_sysex_size: u32,
    pub output_path_id: u8,
}

/// Discovery Reply (0x71).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub common: Common,
    pub device: DeviceDetails,
    pub categories: u8,
    pub max_sysex_size: u32,
    pub output_path_id: u8,
    pub function_block: u8,
}

/// Endpoint Inquiry (0x72).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInquiry {
    pub common: Common,
    pub status: u8,
}

/// Endpoint Reply (0x73).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReply {
    pub common: Common,
    pub status: u8,
    pub data: Vec<u8>,
}

/// Invalidate MUID (0x7E).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateMuid {
    pub common: Common,
    pub target: Muid,
}

/// Body shared by ACK (0x7D) and NAK (0x7F).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge {
    pub common: Common,
    /// Sub-ID #2 of the message being (negatively) acknowledged.
    pub original_sub_id2: u8,
    pub status_code: u8,
    pub status_data: u8,
    pub details: [u8; 5],
    /// Free text; non-ASCII characters do not survive the trip.
    pub message: String,
}

impl Acknowledge {
    /// Interprets `status_code` as a NAK status.
    pub fn nak_status(&self) -> Option<NakStatus> {
        NakStatus::try_from(self.status_code).ok()
    }
}

/// Profile Inquiry Reply (0x11).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileReply {
    pub common: Common,
    pub enabled: Vec<ProfileId>,
    pub disabled: Vec<ProfileId>,
}

/// Profile Added / Removed reports (0x16 / 0x17).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub common: Common,
    pub profile: ProfileId,
}

/// Set Profile On/Off (0x12/0x13) and Profile Enabled/Disabled reports
/// (0x14/0x15): a profile id plus a channel count.
///
/// Set Profile Off carries a reserved field in that position; it is always
/// encoded as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChannels {
    pub common: Common,
    pub profile: ProfileId,
    pub num_channels: u16,
}

/// Profile Details Inquiry (0x20).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDetailsInquiry {
    pub common: Common,
    pub profile: ProfileId,
    pub target: u8,
}

/// Profile Details Reply (0x21).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDetailsReply {
    pub common: Common,
    pub profile: ProfileId,
    pub target: u8,
    pub data: Vec<u8>,
}

/// Profile Specific Data (0x2F).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpecificData {
    pub common: Common,
    pub profile: ProfileId,
    pub data: Vec<u8>,
}

/// Property Exchange Capabilities inquiry and reply (0x30 / 0x31).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyCapabilities {
    pub common: Common,
    pub max_simultaneous_requests: u8,
    pub major_version: u8,
    pub minor_version: u8,
}

/// One packet of a Property Exchange transfer (0x34–0x39, 0x3F).
///
/// `chunk_index` is 1-based; the last packet has `chunk_index == num_chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChunk {
    pub common: Common,
    pub request_id: u8,
    pub header: Vec<u8>,
    pub num_chunks: u16,
    pub chunk_index: u16,
    pub body: Vec<u8>,
}

impl PropertyChunk {
    pub fn is_last(&self) -> bool {
        self.chunk_index >= self.num_chunks
    }
}

/// Process Inquiry Capabilities Reply (0x41).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInquiryReply {
    pub common: Common,
    /// Bitmask; see [`report::FEATURE_MIDI_MESSAGE_REPORT`].
    pub supported_features: u8,
}

/// MIDI Message Report inquiry (0x42).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessageReport {
    pub common: Common,
    pub message_data_control: u8,
    pub system_messages: u8,
    pub channel_controller_messages: u8,
    pub note_data_messages: u8,
}

/// Reply to MIDI Message Report (0x43).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessageReportReply {
    pub common: Common,
    pub system_messages: u8,
    pub channel_controller_messages: u8,
    pub note_data_messages: u8,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Every MIDI-CI message, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    DiscoveryInquiry(DiscoveryInquiry),
    DiscoveryReply(DiscoveryReply),
    EndpointInquiry(EndpointInquiry),
    EndpointReply(EndpointReply),
    InvalidateMuid(InvalidateMuid),
    Ack(Acknowledge),
    Nak(Acknowledge),
    ProfileInquiry(Common),
    ProfileReply(ProfileReply),
    ProfileAdded(ProfileReport),
    ProfileRemoved(ProfileReport),
    ProfileEnabled(ProfileChannels),
    ProfileDisabled(ProfileChannels),
    ProfileDetailsInquiry(ProfileDetailsInquiry),
    ProfileDetailsReply(ProfileDetailsReply),
    SetProfileOn(ProfileChannels),
    SetProfileOff(ProfileChannels),
    ProfileSpecificData(ProfileSpecificData),
    PropertyCapabilities(PropertyCapabilities),
    PropertyCapabilitiesReply(PropertyCapabilities),
    GetPropertyData(PropertyChunk),
    GetPropertyDataReply(PropertyChunk),
    SetPropertyData(PropertyChunk),
    SetPropertyDataReply(PropertyChunk),
    SubscribeProperty(PropertyChunk),
    SubscribePropertyReply(PropertyChunk),
    PropertyNotify(PropertyChunk),
    ProcessInquiryCapabilities(Common),
    ProcessInquiryCapabilitiesReply(ProcessInquiryReply),
    MidiMessageReport(MidiMessageReport),
    MidiMessageReportReply(MidiMessageReportReply),
    EndOfMidiMessageReport(Common),
}

impl Message {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::DiscoveryInquiry(_) => MessageType::DiscoveryInquiry,
            Message::DiscoveryReply(_) => MessageType::DiscoveryReply,
            Message::EndpointInquiry(_) => MessageType::EndpointInquiry,
            Message::EndpointReply(_) => MessageType::EndpointReply,
            Message::InvalidateMuid(_) => MessageType::InvalidateMuid,
            Message::Ack(_) => MessageType::Ack,
            Message::Nak(_) => MessageType::Nak,
            Message::ProfileInquiry(_) => MessageType::ProfileInquiry,
            Message::ProfileReply(_) => MessageType::ProfileReply,
            Message::ProfileAdded(_) => MessageType::ProfileAdded,
            Message::ProfileRemoved(_) => MessageType::ProfileRemoved,
            Message::ProfileEnabled(_) => MessageType::ProfileEnabled,
            Message::ProfileDisabled(_) => MessageType::ProfileDisabled,
            Message::ProfileDetailsInquiry(_) => MessageType::ProfileDetailsInquiry,
            Message::ProfileDetailsReply(_) => MessageType::ProfileDetailsReply,
            Message::SetProfileOn(_) => MessageType::SetProfileOn,
            Message::SetProfileOff(_) => MessageType::SetProfileOff,
            Message::ProfileSpecificData(_) => MessageType::ProfileSpecificData,
            Message::PropertyCapabilities(_) => MessageType::PropertyCapabilities,
            Message::PropertyCapabilitiesReply(_) => MessageType::PropertyCapabilitiesReply,
            Message::GetPropertyData(_) => MessageType::GetPropertyData,
            Message::GetPropertyDataReply(_) => MessageType::GetPropertyDataReply,
            Message::SetPropertyData(_) => MessageType::SetPropertyData,
            Message::SetPropertyDataReply(_) => MessageType::SetPropertyDataReply,
            Message::SubscribeProperty(_) => MessageType::SubscribeProperty,
            Message::SubscribePropertyReply(_) => MessageType::SubscribePropertyReply,
            Message::PropertyNotify(_) => MessageType::PropertyNotify,
            Message::ProcessInquiryCapabilities(_) => MessageType::ProcessInquiryCapabilities,
            Message::ProcessInquiryCapabilitiesReply(_) => {
                MessageType::ProcessInquiryCapabilitiesReply
            }
            Message::MidiMessageReport(_) => MessageType::MidiMessageReport,
            Message::MidiMessageReportReply(_) => MessageType::MidiMessageReportReply,
            Message::EndOfMidiMessageReport(_) => MessageType::EndOfMidiMessageReport,
        }
    }

    /// Returns the shared envelope.
    pub fn common(&self) -> &Common {
        match self {
            Message::DiscoveryInquiry(m) => &m.common,
            Message::DiscoveryReply(m) => &m.common,
            Message::EndpointInquiry(m) => &m.common,
            Message::EndpointReply(m) => &m.common,
            Message::InvalidateMuid(m) => &m.common,
            Message::Ack(m) | Message::Nak(m) => &m.common,
            Message::ProfileInquiry(c)
            | Message::ProcessInquiryCapabilities(c)
            | Message::EndOfMidiMessageReport(c) => c,
            Message::ProfileReply(m) => &m.common,
            Message::ProfileAdded(m) | Message::ProfileRemoved(m) => &m.common,
            Message::ProfileEnabled(m)
            | Message::ProfileDisabled(m)
            | Message::SetProfileOn(m)
            | Message::SetProfileOff(m) => &m.common,
            Message::ProfileDetailsInquiry(m) => &m.common,
            Message::ProfileDetailsReply(m) => &m.common,
            Message::ProfileSpecificData(m) => &m.common,
            Message::PropertyCapabilities(m) | Message::PropertyCapabilitiesReply(m) => &m.common,
            Message::GetPropertyData(m)
            | Message::GetPropertyDataReply(m)
            | Message::SetPropertyData(m)
            | Message::SetPropertyDataReply(m)
            | Message::SubscribeProperty(m)
            | Message::SubscribePropertyReply(m)
            | Message::PropertyNotify(m) => &m.common,
            Message::ProcessInquiryCapabilitiesReply(m) => &m.common,
            Message::MidiMessageReport(m) => &m.common,
            Message::MidiMessageReportReply(m) => &m.common,
        }
    }

    /// Returns the Property Exchange packet, for the chunked kinds.
    pub fn property_chunk(&self) -> Option<&PropertyChunk> {
        match self {
            Message::GetPropertyData(m)
            | Message::GetPropertyDataReply(m)
            | Message::SetPropertyData(m)
            | Message::SetPropertyDataReply(m)
            | Message::SubscribeProperty(m)
            | Message::SubscribePropertyReply(m)
            | Message::PropertyNotify(m) => Some(m),
            _ => None,
        }
    }
}

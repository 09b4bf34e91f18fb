//! Integration tests for discovery, management, Profile Configuration and
//! Process Inquiry.
//!
//! These tests wire two real [`MidiCiDevice`] engines back to back through
//! in-memory [`QueueTransport`]s and let them talk until the traffic settles.
//! Where a scenario needs a misbehaving or absent peer, the bytes are built
//! with `midi_ci_core::encode_message` and fed straight into
//! `process_input`, exactly as a MIDI driver would.
//!
//! Scenarios covered:
//!
//! 1. Discovery creates one connection and the automatic follow-ups fill in
//!    endpoint, profile, property and process-inquiry state.
//! 2. Remote profiles can be listed, switched on and off end to end.
//! 3. Invalidate MUID drops connections and is idempotent.
//! 4. Every inbound failure path answers with the right NAK (or stays
//!    silent) instead of failing.
//! 5. A MIDI Message Report streams the reporter's messages between the
//!    reply and the end marker.

mod common;

use common::{drain_messages, muid, quiet_config, record_events, responder_config, Pair, INITIATOR, RESPONDER};
use midi_ci_core::protocol::{
    categories, report, Common, DiscoveryInquiry, DiscoveryReply, InvalidateMuid, NakStatus,
    ProcessInquiryReply, PropertyChunk,
};
use midi_ci_core::{encode_message, Address, DeviceDetails, Message, Profile, ProfileId};
use midi_ci_device::{CiEvent, DeviceConfig, MidiCiDevice, MidiMessageReporter, QueueTransport, ReportRequest};

fn gm2() -> ProfileId {
    ProfileId::standard(0, 0x21, 1, 1)
}

fn feed(device: &mut MidiCiDevice, message: &Message) {
    let bytes = encode_message(message).unwrap();
    device.process_input(message.common().group, &bytes);
}

/// A lone engine with MUID `RESPONDER` and a handle on what it sends.
fn lone_responder() -> (MidiCiDevice, QueueTransport) {
    common::init_tracing();
    let out = QueueTransport::new();
    let device = MidiCiDevice::new(RESPONDER, DeviceConfig::default(), Box::new(out.clone())).unwrap();
    (device, out)
}

fn discovery_inquiry_from(source: u32, version: u8) -> Message {
    let common = Common::new(muid(source), midi_ci_core::Muid::BROADCAST, Address::FUNCTION_BLOCK, 0)
        .with_version(version);
    Message::DiscoveryInquiry(DiscoveryInquiry {
        common,
        device: DeviceDetails::new(0x7D, 0, 0, 0),
        categories: categories::PROPERTY_EXCHANGE,
        max_sysex_size: 4096,
        output_path_id: 0,
    })
}

fn single_naks(messages: &[Message]) -> Vec<(u8, u8, String)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Nak(nak) => Some((nak.status_code, nak.original_sub_id2, nak.message.clone())),
            _ => None,
        })
        .collect()
}

// ── Discovery ─────────────────────────────────────────────────────────────────

#[test]
fn test_discovery_creates_single_connection_with_peer_details() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    let events = record_events(&mut pair.initiator);

    // Act
    pair.discover();

    // Assert
    let connections: Vec<_> = pair.initiator.connections().collect();
    assert_eq!(connections.len(), 1);
    let conn = connections[0];
    assert_eq!(conn.target_muid, muid(RESPONDER));
    assert_eq!(conn.device.manufacturer_bytes(), [1, 2, 3]);
    assert_eq!(conn.max_sysex_size, 4096);
    let added = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, CiEvent::ConnectionAdded(m) if *m == muid(RESPONDER)))
        .count();
    assert_eq!(added, 1);
}

#[test]
fn test_discovery_auto_queries_fill_in_connection_state() {
    // Arrange
    let mut pair = Pair::new(DeviceConfig::default(), responder_config());

    // Act
    pair.discover();

    // Assert
    let conn = pair.initiator.connection(muid(RESPONDER)).unwrap();
    assert_eq!(conn.product_instance_id.as_deref(), Some("S1-0042"));
    assert_eq!(conn.device_info, Some(responder_config().device_info()));
    assert_eq!(
        conn.process_inquiry_features,
        Some(report::FEATURE_MIDI_MESSAGE_REPORT)
    );
    assert!(conn.properties.metadata("DeviceInfo").is_some());
    assert_eq!(conn.max_simultaneous_requests, 127);
    assert!(conn.open_requests().is_empty());
}

#[test]
fn test_rediscovery_replaces_connection() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();
    let events = record_events(&mut pair.initiator);

    // Act
    pair.discover();

    // Assert
    let seen = events.borrow();
    let removed = seen.iter().position(|e| matches!(e, CiEvent::ConnectionRemoved(_)));
    let added = seen.iter().position(|e| matches!(e, CiEvent::ConnectionAdded(_)));
    assert!(removed.unwrap() < added.unwrap());
    assert_eq!(pair.initiator.connections().count(), 1);
}

#[test]
fn test_discovery_reply_echoes_output_path_id() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let mut inquiry = discovery_inquiry_from(INITIATOR, 0x02);
    if let Message::DiscoveryInquiry(m) = &mut inquiry {
        m.output_path_id = 3;
    }

    // Act
    feed(&mut responder, &inquiry);

    // Assert
    match &drain_messages(&out)[..] {
        [Message::DiscoveryReply(reply)] => {
            assert_eq!(reply.output_path_id, 3);
            assert_eq!(reply.common.destination, muid(INITIATOR));
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ── Profile Configuration ─────────────────────────────────────────────────────

#[test]
fn test_remote_profile_listed_and_toggled_end_to_end() {
    // Arrange
    let mut initiator_config = quiet_config();
    initiator_config.auto_query.profile_inquiry = true;
    let mut pair = Pair::new(initiator_config, responder_config());
    pair.responder
        .add_local_profile(Profile::new(gm2(), 0, Address::channel(0), false, 1))
        .unwrap();
    pair.discover();
    let peer = muid(RESPONDER);

    let listed = pair.initiator.connection(peer).unwrap();
    let profile = listed.profiles.get(&gm2(), 0, Address::channel(0)).unwrap();
    assert!(!profile.enabled);

    // Act: on
    pair.initiator
        .set_remote_profile(peer, Address::channel(0), gm2(), true, 1)
        .unwrap();
    pair.pump();

    // Assert
    let local = pair
        .responder
        .profile_host()
        .profiles()
        .get(&gm2(), 0, Address::channel(0))
        .unwrap();
    assert!(local.enabled);
    let mirrored = pair.initiator.connection(peer).unwrap();
    assert!(mirrored.profiles.get(&gm2(), 0, Address::channel(0)).unwrap().enabled);

    // Act: off
    pair.initiator
        .set_remote_profile(peer, Address::channel(0), gm2(), false, 1)
        .unwrap();
    pair.pump();

    // Assert
    let mirrored = pair.initiator.connection(peer).unwrap();
    let profile = mirrored.profiles.get(&gm2(), 0, Address::channel(0)).unwrap();
    assert!(!profile.enabled);
    assert_eq!(profile.num_channels, 0);
}

#[test]
fn test_set_unknown_profile_is_nakked() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();
    let events = record_events(&mut pair.initiator);

    // Act
    pair.initiator
        .set_remote_profile(muid(RESPONDER), Address::GROUP, gm2(), true, 0)
        .unwrap();
    pair.pump();

    // Assert
    let naks: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            CiEvent::NakReceived(nak) => Some(nak.status_code),
            _ => None,
        })
        .collect();
    assert_eq!(naks, vec![NakStatus::ProfileNotSupported as u8]);
}

#[test]
fn test_profile_details_round_trip() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.responder
        .add_local_profile(Profile::new(gm2(), 0, Address::FUNCTION_BLOCK, false, 0))
        .unwrap();
    pair.responder.set_profile_details(gm2(), 0x01, vec![0x10, 0x20]);
    pair.discover();
    let events = record_events(&mut pair.initiator);

    // Act
    pair.initiator
        .request_profile_details(muid(RESPONDER), Address::FUNCTION_BLOCK, gm2(), 0x01)
        .unwrap();
    pair.pump();

    // Assert
    let details: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            CiEvent::ProfileDetailsReceived(reply) => Some(reply.data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(details, vec![vec![0x10, 0x20]]);
}

// ── Invalidate MUID ───────────────────────────────────────────────────────────

#[test]
fn test_invalidate_muid_is_idempotent() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();
    let events = record_events(&mut pair.initiator);
    let message = Message::InvalidateMuid(InvalidateMuid {
        common: Common::new(muid(0x30), midi_ci_core::Muid::BROADCAST, Address::FUNCTION_BLOCK, 0),
        target: muid(RESPONDER),
    });

    // Act
    feed(&mut pair.initiator, &message);
    feed(&mut pair.initiator, &message);

    // Assert
    assert!(pair.initiator.connection(muid(RESPONDER)).is_none());
    let removed = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, CiEvent::ConnectionRemoved(_)))
        .count();
    assert_eq!(removed, 1);
    assert_eq!(pair.initiator_out.pending(), 0);
}

#[test]
fn test_invalidate_unknown_muid_changes_nothing() {
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();
    let events = record_events(&mut pair.initiator);

    feed(
        &mut pair.initiator,
        &Message::InvalidateMuid(InvalidateMuid {
            common: Common::new(muid(0x30), midi_ci_core::Muid::BROADCAST, Address::FUNCTION_BLOCK, 0),
            target: muid(0x55),
        }),
    );

    assert_eq!(pair.initiator.connections().count(), 1);
    assert!(!events
        .borrow()
        .iter()
        .any(|e| matches!(e, CiEvent::ConnectionRemoved(_))));
}

#[test]
fn test_send_invalidate_muid_drops_connection_locally() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();

    // Act
    pair.initiator.send_invalidate_muid(muid(RESPONDER)).unwrap();

    // Assert
    assert!(pair.initiator.connection(muid(RESPONDER)).is_none());
    match &drain_messages(&pair.initiator_out)[..] {
        [Message::InvalidateMuid(m)] => {
            assert!(m.common.destination.is_broadcast());
            assert_eq!(m.target, muid(RESPONDER));
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ── Failure handling ──────────────────────────────────────────────────────────

#[test]
fn test_version_mismatch_is_nakked_and_still_answered() {
    // Arrange
    let (mut responder, out) = lone_responder();

    // Act
    feed(&mut responder, &discovery_inquiry_from(INITIATOR, 0x01));

    // Assert
    let sent = drain_messages(&out);
    assert_eq!(sent.len(), 2);
    assert_eq!(
        single_naks(&sent),
        vec![(NakStatus::CiVersionNotSupported as u8, 0x70, "unsupported MIDI-CI version".to_string())]
    );
    assert!(matches!(&sent[1], Message::DiscoveryReply(r) if r.common.destination == muid(INITIATOR)));
}

#[test]
fn test_truncated_message_is_nakked_as_malformed() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let bytes = encode_message(&discovery_inquiry_from(INITIATOR, 0x02)).unwrap();

    // Act
    responder.process_input(0, &bytes[..20]);

    // Assert
    let sent = drain_messages(&out);
    assert_eq!(
        single_naks(&sent),
        vec![(NakStatus::MalformedMessage as u8, 0x70, "malformed message".to_string())]
    );
    assert_eq!(sent.len(), 1);
}

#[test]
fn test_unknown_message_kind_is_reported_and_nakked() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let events = record_events(&mut responder);
    let common = Common::new(muid(INITIATOR), muid(RESPONDER), Address::FUNCTION_BLOCK, 0);
    let mut bytes = encode_message(&Message::ProfileInquiry(common)).unwrap();
    bytes[3] = 0x32;

    // Act
    responder.process_input(0, &bytes);

    // Assert
    let sent = drain_messages(&out);
    assert_eq!(
        single_naks(&sent),
        vec![(NakStatus::MessageNotSupported as u8, 0x32, "message not supported".to_string())]
    );
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, CiEvent::UnknownMessage { bytes: b, .. } if b[3] == 0x32)));
}

#[test]
fn test_reply_from_unknown_muid_is_nakked_as_not_connected() {
    // Arrange
    let (mut device, out) = lone_responder();
    let reply = Message::ProcessInquiryCapabilitiesReply(ProcessInquiryReply {
        common: Common::new(muid(0x44), muid(RESPONDER), Address::FUNCTION_BLOCK, 0),
        supported_features: report::FEATURE_MIDI_MESSAGE_REPORT,
    });

    // Act
    feed(&mut device, &reply);

    // Assert
    let sent = drain_messages(&out);
    assert_eq!(
        single_naks(&sent),
        vec![(NakStatus::Nak as u8, 0x41, "not connected".to_string())]
    );
    assert_eq!(sent[0].common().destination, muid(0x44));
}

#[test]
fn test_chunk_out_of_sequence_is_nakked() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let chunk = PropertyChunk {
        common: Common::new(muid(INITIATOR), muid(RESPONDER), Address::FUNCTION_BLOCK, 0),
        request_id: 9,
        header: Vec::new(),
        num_chunks: 3,
        chunk_index: 2,
        body: b"abc".to_vec(),
    };

    // Act
    feed(&mut responder, &Message::GetPropertyData(chunk));

    // Assert
    let naks = single_naks(&drain_messages(&out));
    assert_eq!(naks.len(), 1);
    assert_eq!(naks[0].0, NakStatus::PropertyChunksOutOfSequence as u8);
    assert_eq!(naks[0].1, 0x34);
    assert_eq!(responder.pending_chunk_transfers(), 0);
}

#[test]
fn test_message_for_other_device_is_dropped_silently() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let events = record_events(&mut responder);
    let common = Common::new(muid(INITIATOR), muid(0x33), Address::FUNCTION_BLOCK, 0);

    // Act
    feed(&mut responder, &Message::ProfileInquiry(common));
    responder.process_input(0, &[0xF0, 0x01, 0x02]);

    // Assert
    assert_eq!(out.pending(), 0);
    assert!(events.borrow().is_empty());
}

#[test]
fn test_nak_is_never_answered() {
    // Arrange
    let (mut responder, out) = lone_responder();
    let events = record_events(&mut responder);
    let common = Common::new(muid(INITIATOR), muid(RESPONDER), Address::FUNCTION_BLOCK, 0)
        .with_version(0x01);
    let nak = Message::Nak(midi_ci_core::protocol::Acknowledge {
        common,
        original_sub_id2: 0x34,
        status_code: NakStatus::Timeout as u8,
        status_data: 0,
        details: [0; 5],
        message: String::new(),
    });

    // Act
    feed(&mut responder, &nak);

    // Assert
    assert_eq!(out.pending(), 0);
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, CiEvent::NakReceived(n) if n.original_sub_id2 == 0x34)));
}

// ── Process Inquiry ───────────────────────────────────────────────────────────

struct FixedReporter(Vec<Vec<u8>>);

impl MidiMessageReporter for FixedReporter {
    fn report<'a>(&'a mut self, _request: &ReportRequest) -> Box<dyn Iterator<Item = Vec<u8>> + 'a> {
        Box::new(self.0.iter().cloned())
    }
}

#[test]
fn test_midi_message_report_streams_between_reply_and_end() {
    // Arrange
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.responder.set_midi_message_reporter(Box::new(FixedReporter(vec![
        vec![0xB0, 7, 100],
        vec![0xC0, 5],
    ])));
    pair.discover();
    let events = record_events(&mut pair.initiator);

    // Act
    pair.initiator
        .request_midi_message_report(
            muid(RESPONDER),
            Address::channel(0),
            report::DATA_CONTROL_FULL,
            0x7F,
            0x7F,
            0x7F,
        )
        .unwrap();
    pair.pump();

    // Assert
    assert_eq!(
        pair.responder_out.drain_midi(),
        vec![(0, vec![0xB0, 7, 100]), (0, vec![0xC0, 5])]
    );
    let seen = events.borrow();
    let reply = seen
        .iter()
        .find_map(|e| match e {
            CiEvent::MidiMessageReportReply(r) => Some(r.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(reply.system_messages, 0x07);
    assert_eq!(reply.channel_controller_messages, 0x3F);
    assert_eq!(reply.note_data_messages, 0x0F);
    assert!(seen
        .iter()
        .any(|e| matches!(e, CiEvent::MidiMessageReportFinished { muid: m } if *m == muid(RESPONDER))));
}

#[test]
fn test_midi_message_report_without_feature_is_nakked() {
    // Arrange
    let mut responder = responder_config();
    responder.protocol.process_inquiry_features = 0;
    let mut pair = Pair::new(quiet_config(), responder);
    pair.discover();
    let events = record_events(&mut pair.initiator);

    // Act
    pair.initiator
        .request_midi_message_report(muid(RESPONDER), Address::FUNCTION_BLOCK, report::DATA_CONTROL_FULL, 1, 1, 1)
        .unwrap();
    pair.pump();

    // Assert
    let seen = events.borrow();
    assert!(seen.iter().any(|e| matches!(
        e,
        CiEvent::NakReceived(n) if n.status_code == NakStatus::MessageNotSupported as u8
    )));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, CiEvent::MidiMessageReportFinished { .. })));
}

#[test]
fn test_process_inquiry_reply_is_stored() {
    let mut pair = Pair::new(quiet_config(), responder_config());
    pair.discover();

    pair.initiator.request_process_inquiry(muid(RESPONDER)).unwrap();
    pair.pump();

    let conn = pair.initiator.connection(muid(RESPONDER)).unwrap();
    assert_eq!(
        conn.process_inquiry_features,
        Some(report::FEATURE_MIDI_MESSAGE_REPORT)
    );
}

#[test]
fn test_discovery_reply_for_other_initiator_creates_nothing() {
    let (mut device, out) = lone_responder();
    let reply = Message::DiscoveryReply(DiscoveryReply {
        common: Common::new(muid(0x44), midi_ci_core::Muid::BROADCAST, Address::FUNCTION_BLOCK, 0),
        device: DeviceDetails::new(0x7D, 0, 0, 0),
        categories: 0,
        max_sysex_size: 512,
        output_path_id: 0,
        function_block: 0x7F,
    });

    feed(&mut device, &reply);

    assert_eq!(device.connections().count(), 0);
    assert_eq!(out.pending(), 0);
}

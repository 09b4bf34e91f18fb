//! Inbound half of the engine.
//!
//! [`MidiCiDevice::process_input`] is the single entry point for received
//! MIDI-CI SysEx.  It filters, validates and decodes the message, then hands
//! it to one handler per message kind.
//!
//! # Failure policy
//!
//! Nothing a peer sends can make `process_input` fail or panic:
//!
//! | Condition                                  | Response                         |
//! |--------------------------------------------|----------------------------------|
//! | not MIDI-CI / shorter than the header      | dropped silently                 |
//! | addressed to another MUID                  | dropped silently                 |
//! | version differs from ours                  | NAK(CI version), still handled   |
//! | unknown sub-ID #2                          | NAK(message not supported)       |
//! | truncated or inconsistent payload          | NAK(malformed message)           |
//! | reply from a MUID without connection       | NAK(Nak, "not connected")        |
//! | chunk out of sequence                      | NAK(chunks out of sequence)      |
//! | unknown local profile                      | NAK(profile not supported)       |
//! | Property Exchange request cannot be served | error reply with a status code   |
//!
//! ACK and NAK messages are never answered with a NAK.

use std::time::Instant;

use midi_ci_core::property::common_rules::{parse_device_info, parse_resource_list};
use midi_ci_core::property::{apply_partial_update, resources, status};
use midi_ci_core::protocol::{
    categories, decode_header, report, Acknowledge, ChunkProgress, Common, DiscoveryInquiry,
    DiscoveryReply, EndpointInquiry, EndpointReply, InvalidateMuid, MessageType,
    MidiMessageReport, MidiMessageReportReply, NakStatus, ProcessInquiryReply, ProfileChannels,
    ProfileDetailsInquiry, ProfileDetailsReply, ProfileReply, ProfileReport, PropertyCapabilities,
    PropertyChunk, ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
};
use midi_ci_core::{
    decode_message, Address, Message, Muid, Profile, PropertyHeader, PropertyValue,
    SubscriptionCommand,
};
use tracing::{debug, error, info, trace, warn};

use super::connection::{ClientConnection, OpenRequest, RequestKind};
use super::device::{CiError, MidiCiDevice};
use super::property_host::{HostError, HostReply, SetOutcome};
use super::subscription::{ReplyOutcome, SubscriptionState};
use crate::infrastructure::events::CiEvent;
use crate::infrastructure::transport::ReportRequest;

impl MidiCiDevice {
    /// Processes one received MIDI-CI message (SysEx payload without
    /// F0/F7) from `group`.
    pub fn process_input(&mut self, group: u8, bytes: &[u8]) {
        self.process_input_at(group, bytes, Instant::now());
    }

    /// [`MidiCiDevice::process_input`] with an explicit clock, used to
    /// timestamp chunked transfers.
    pub fn process_input_at(&mut self, group: u8, bytes: &[u8], now: Instant) {
        let raw = match decode_header(group, bytes) {
            Ok(raw) => raw,
            Err(e) => {
                trace!(group, error = %e, "ignoring non MIDI-CI input");
                return;
            }
        };
        let common = raw.common;
        let own = self.muid();
        // Addressing is checked before the version, so traffic for other
        // devices is dropped silently even when its version is unsupported.
        if common.destination != own && !common.destination.is_broadcast() {
            trace!(to = %common.destination, "message for another device");
            return;
        }
        if common.source == own {
            trace!("ignoring our own message");
            return;
        }

        let kind = MessageType::try_from(raw.sub_id2).ok();
        let is_ack = matches!(kind, Some(MessageType::Ack | MessageType::Nak));
        if common.version != self.config.protocol.ci_version && !is_ack {
            warn!(from = %common.source, version = common.version, "unsupported MIDI-CI version");
            self.nak_or_log(
                &common,
                raw.sub_id2,
                NakStatus::CiVersionNotSupported,
                "unsupported MIDI-CI version",
            );
        }

        let Some(kind) = kind else {
            warn!(from = %common.source, sub_id2 = raw.sub_id2, "unknown MIDI-CI message");
            self.messenger.publish(CiEvent::UnknownMessage {
                group,
                bytes: bytes.to_vec(),
            });
            self.nak_or_log(
                &common,
                raw.sub_id2,
                NakStatus::MessageNotSupported,
                "message not supported",
            );
            return;
        };

        let message = match decode_message(group, bytes) {
            Ok(message) => message,
            Err(e) => {
                error!(from = %common.source, ?kind, error = %e, "malformed MIDI-CI message");
                if !is_ack {
                    self.nak_or_log(&common, raw.sub_id2, NakStatus::MalformedMessage, "malformed message");
                }
                return;
            }
        };

        trace!(?kind, from = %common.source, group, len = bytes.len(), "MIDI-CI receive");
        self.messenger
            .publish(CiEvent::MessageReceived(message.clone()));
        if let Err(e) = self.dispatch(message, now) {
            self.report_failure(&common, raw.sub_id2, e);
        }
    }

    fn dispatch(&mut self, message: Message, now: Instant) -> Result<(), CiError> {
        match message {
            // Management
            Message::DiscoveryInquiry(m) => self.on_discovery_inquiry(&m),
            Message::DiscoveryReply(m) => self.on_discovery_reply(m),
            Message::EndpointInquiry(m) => self.on_endpoint_inquiry(&m),
            Message::EndpointReply(m) => self.on_endpoint_reply(&m),
            Message::InvalidateMuid(m) => {
                self.on_invalidate_muid(&m);
                Ok(())
            }
            Message::Ack(m) => {
                debug!(from = %m.common.source, original = m.original_sub_id2, "ACK received");
                self.messenger.publish(CiEvent::AckReceived(m));
                Ok(())
            }
            Message::Nak(m) => {
                self.on_nak(m);
                Ok(())
            }

            // Profile Configuration
            Message::ProfileInquiry(c) => self.on_profile_inquiry(&c),
            Message::ProfileReply(m) => self.on_profile_reply(&m),
            Message::ProfileAdded(m) => {
                self.on_remote_profile_report(&m, true);
                Ok(())
            }
            Message::ProfileRemoved(m) => {
                self.on_remote_profile_report(&m, false);
                Ok(())
            }
            Message::ProfileEnabled(m) => {
                self.on_remote_profile_state(&m, true);
                Ok(())
            }
            Message::ProfileDisabled(m) => {
                self.on_remote_profile_state(&m, false);
                Ok(())
            }
            Message::SetProfileOn(m) => self.on_set_profile(&m, true),
            Message::SetProfileOff(m) => self.on_set_profile(&m, false),
            Message::ProfileDetailsInquiry(m) => self.on_profile_details_inquiry(&m),
            Message::ProfileDetailsReply(m) => {
                self.messenger.publish(CiEvent::ProfileDetailsReceived(m));
                Ok(())
            }
            Message::ProfileSpecificData(m) => {
                self.messenger
                    .publish(CiEvent::ProfileSpecificDataReceived(m));
                Ok(())
            }

            // Property Exchange
            Message::PropertyCapabilities(m) => self.on_property_capabilities(&m),
            Message::PropertyCapabilitiesReply(m) => self.on_property_capabilities_reply(&m),
            Message::GetPropertyData(c) => self.on_property_request(RequestKind::Get, &c, now),
            Message::SetPropertyData(c) => self.on_property_request(RequestKind::Set, &c, now),
            Message::SubscribeProperty(c) => {
                self.on_property_request(RequestKind::Subscribe, &c, now)
            }
            Message::GetPropertyDataReply(c) => self.on_property_reply(RequestKind::Get, &c, now),
            Message::SetPropertyDataReply(c) => self.on_property_reply(RequestKind::Set, &c, now),
            Message::SubscribePropertyReply(c) => {
                self.on_property_reply(RequestKind::Subscribe, &c, now)
            }
            Message::PropertyNotify(c) => {
                self.messenger.publish(CiEvent::PropertyNotify {
                    muid: c.common.source,
                    request_id: c.request_id,
                    header: c.header,
                });
                Ok(())
            }

            // Process Inquiry
            Message::ProcessInquiryCapabilities(c) => self.on_process_inquiry(&c),
            Message::ProcessInquiryCapabilitiesReply(m) => self.on_process_inquiry_reply(&m),
            Message::MidiMessageReport(m) => self.on_midi_message_report(&m),
            Message::MidiMessageReportReply(m) => self.on_midi_message_report_reply(m),
            Message::EndOfMidiMessageReport(c) => {
                debug!(from = %c.source, "MIDI message report finished");
                self.messenger
                    .publish(CiEvent::MidiMessageReportFinished { muid: c.source });
                Ok(())
            }
        }
    }

    // ── Failure reporting ─────────────────────────────────────────────────────

    fn nak_or_log(&mut self, to: &Common, original_sub_id2: u8, status: NakStatus, text: &str) {
        if let Err(e) = self.messenger.send_nak(to, original_sub_id2, status, text) {
            error!(to = %to.source, error = %e, "failed to send NAK");
        }
    }

    fn report_failure(&mut self, to: &Common, original_sub_id2: u8, err: CiError) {
        let nak = match &err {
            CiError::NotConnected(_) => Some((NakStatus::Nak, "not connected")),
            CiError::Chunk(_) => Some((
                NakStatus::PropertyChunksOutOfSequence,
                "property exchange chunks out of sequence",
            )),
            CiError::ProfileNotFound(_) => Some((NakStatus::ProfileNotSupported, "profile not supported")),
            CiError::MalformedProperty(_) => Some((NakStatus::MalformedMessage, "malformed property data")),
            _ => None,
        };
        match nak {
            Some((status, text)) => {
                warn!(from = %to.source, sub_id2 = original_sub_id2, error = %err, "rejecting message");
                self.nak_or_log(to, original_sub_id2, status, text);
            }
            None => {
                error!(from = %to.source, sub_id2 = original_sub_id2, error = %err, "failed to handle MIDI-CI message");
            }
        }
    }

    // ── Management ────────────────────────────────────────────────────────────

    fn on_discovery_inquiry(&mut self, inquiry: &DiscoveryInquiry) -> Result<(), CiError> {
        debug!(from = %inquiry.common.source, "discovery inquiry");
        let common = self.messenger.common(
            inquiry.common.source,
            Address::FUNCTION_BLOCK,
            inquiry.common.group,
        );
        let reply = DiscoveryReply {
            common,
            device: self.config.device_details(),
            categories: self.config.protocol.ci_category_supported,
            max_sysex_size: self.config.limits.max_sysex_size,
            output_path_id: inquiry.output_path_id,
            function_block: self.config.protocol.function_block,
        };
        self.messenger.send(Message::DiscoveryReply(reply))
    }

    fn on_discovery_reply(&mut self, reply: DiscoveryReply) -> Result<(), CiError> {
        let peer = reply.common.source;
        if reply.common.destination != self.muid() {
            trace!(%peer, "discovery reply for another initiator");
            return Ok(());
        }

        // Re-discovery replaces the connection: removed, then added.
        self.drop_connection(peer);
        let conn = ClientConnection::new(
            peer,
            reply.common.group,
            reply.device,
            reply.categories,
            reply.max_sysex_size,
            reply.output_path_id,
            reply.function_block,
        );
        self.connections.insert(peer, conn);
        info!(
            %peer,
            manufacturer = reply.device.manufacturer,
            categories = reply.categories,
            "connection added"
        );
        self.messenger.publish(CiEvent::ConnectionAdded(peer));

        self.auto_query(peer, reply.categories)
    }

    /// Follow-up inquiries after discovery, each gated by its flag and by
    /// the categories the peer advertised.
    fn auto_query(&mut self, peer: Muid, peer_categories: u8) -> Result<(), CiError> {
        let auto = &self.config.auto_query;
        let (endpoint, profiles, properties, process) = (
            auto.endpoint_inquiry,
            auto.profile_inquiry && peer_categories & categories::PROFILE_CONFIGURATION != 0,
            auto.property_capabilities && peer_categories & categories::PROPERTY_EXCHANGE != 0,
            auto.process_inquiry && peer_categories & categories::PROCESS_INQUIRY != 0,
        );
        if endpoint {
            self.send_endpoint_inquiry(peer)?;
        }
        if profiles {
            self.request_profiles(peer, Address::FUNCTION_BLOCK)?;
        }
        if properties {
            self.request_property_capabilities(peer)?;
        }
        if process {
            self.request_process_inquiry(peer)?;
        }
        Ok(())
    }

    fn on_endpoint_inquiry(&mut self, inquiry: &EndpointInquiry) -> Result<(), CiError> {
        let data = if inquiry.status == ENDPOINT_STATUS_PRODUCT_INSTANCE_ID {
            self.config.identity.product_instance_id.as_bytes().to_vec()
        } else {
            Vec::new()
        };
        let common = self.messenger.reply_common(&inquiry.common);
        self.messenger.send(Message::EndpointReply(EndpointReply {
            common,
            status: inquiry.status,
            data,
        }))
    }

    fn on_endpoint_reply(&mut self, reply: &EndpointReply) -> Result<(), CiError> {
        let peer = reply.common.source;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        if reply.status == ENDPOINT_STATUS_PRODUCT_INSTANCE_ID {
            let id = String::from_utf8_lossy(&reply.data).into_owned();
            debug!(%peer, product_instance_id = %id, "endpoint reply");
            conn.product_instance_id = Some(id);
        }
        Ok(())
    }

    /// Idempotent: an unknown MUID is a no-op.
    fn on_invalidate_muid(&mut self, message: &InvalidateMuid) {
        let target = message.target;
        if target == self.muid() {
            warn!(from = %message.common.source, "peer invalidated our MUID");
            return;
        }
        self.drop_connection(target);
        let dropped = self.property_host.remove_subscribers_of(target);
        if dropped > 0 {
            debug!(%target, dropped, "subscribers of invalidated MUID removed");
        }
    }

    fn on_nak(&mut self, nak: Acknowledge) {
        warn!(
            from = %nak.common.source,
            original = nak.original_sub_id2,
            status = ?nak.nak_status(),
            message = %nak.message,
            "NAK received"
        );
        self.messenger.publish(CiEvent::NakReceived(nak));
    }

    // ── Profile Configuration ─────────────────────────────────────────────────

    fn on_profile_inquiry(&mut self, inquiry: &Common) -> Result<(), CiError> {
        let group = inquiry.group;
        for address in self.profile_host.inquiry_addresses(group, inquiry.address) {
            let (enabled, disabled) = self.profile_host.reply_lists(group, address);
            let common = self.messenger.common(inquiry.source, address, group);
            self.messenger.send(Message::ProfileReply(ProfileReply {
                common,
                enabled,
                disabled,
            }))?;
        }
        Ok(())
    }

    fn on_profile_reply(&mut self, reply: &ProfileReply) -> Result<(), CiError> {
        let peer = reply.common.source;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        conn.profiles.replace_at(
            reply.common.group,
            reply.common.address,
            &reply.enabled,
            &reply.disabled,
        );
        debug!(%peer, address = %reply.common.address, enabled = reply.enabled.len(), disabled = reply.disabled.len(), "remote profiles updated");
        self.messenger
            .publish(CiEvent::ProfilesUpdated { muid: peer });
        Ok(())
    }

    /// Profile Added / Removed from a peer.  Reports from devices we never
    /// discovered are ignored.
    fn on_remote_profile_report(&mut self, report: &ProfileReport, added: bool) {
        let c = &report.common;
        let Some(conn) = self.connections.get_mut(&c.source) else {
            debug!(from = %c.source, "profile report from unknown device ignored");
            return;
        };
        let changed = if added {
            conn.profiles
                .add(Profile::new(report.profile, c.group, c.address, false, 0))
        } else {
            conn.profiles
                .remove(&report.profile, c.group, c.address)
                .is_some()
        };
        if changed {
            self.messenger
                .publish(CiEvent::ProfilesUpdated { muid: c.source });
        }
    }

    /// Profile Enabled / Disabled from a peer.
    fn on_remote_profile_state(&mut self, report: &ProfileChannels, enabled: bool) {
        let c = &report.common;
        let Some(conn) = self.connections.get_mut(&c.source) else {
            debug!(from = %c.source, "profile report from unknown device ignored");
            return;
        };
        if conn
            .profiles
            .set_enabled(&report.profile, c.group, c.address, enabled, report.num_channels)
            .is_none()
        {
            conn.profiles.add(Profile::new(
                report.profile,
                c.group,
                c.address,
                enabled,
                report.num_channels,
            ));
        }
        self.messenger
            .publish(CiEvent::ProfilesUpdated { muid: c.source });
    }

    fn on_set_profile(&mut self, request: &ProfileChannels, enabled: bool) -> Result<(), CiError> {
        let c = &request.common;
        let mut num_channels = if enabled { request.num_channels } else { 0 };
        if enabled
            && num_channels == 1
            && c.address.is_wide()
            && self.config.compat.profile_on_num_channels_one_for_wide
        {
            num_channels = 0;
        }
        let profile = self
            .profile_host
            .set_enabled(&request.profile, c.group, c.address, enabled, num_channels)
            .ok_or(CiError::ProfileNotFound(request.profile))?;
        info!(from = %c.source, profile = %profile.id, enabled, "local profile toggled by peer");
        self.report_profile_state(&profile)
    }

    fn on_profile_details_inquiry(&mut self, inquiry: &ProfileDetailsInquiry) -> Result<(), CiError> {
        let data = self
            .profile_host
            .details(&inquiry.profile, inquiry.target)
            .ok_or(CiError::ProfileNotFound(inquiry.profile))?
            .to_vec();
        let common = self.messenger.reply_common(&inquiry.common);
        self.messenger
            .send(Message::ProfileDetailsReply(ProfileDetailsReply {
                common,
                profile: inquiry.profile,
                target: inquiry.target,
                data,
            }))
    }

    // ── Property Exchange: capabilities ───────────────────────────────────────

    fn on_property_capabilities(&mut self, inquiry: &PropertyCapabilities) -> Result<(), CiError> {
        let common = self.messenger.reply_common(&inquiry.common);
        let reply = self.property_capabilities(common);
        self.messenger.send(Message::PropertyCapabilitiesReply(reply))
    }

    fn on_property_capabilities_reply(&mut self, reply: &PropertyCapabilities) -> Result<(), CiError> {
        let peer = reply.common.source;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        conn.max_simultaneous_requests = reply.max_simultaneous_requests.max(1);
        debug!(%peer, max_requests = conn.max_simultaneous_requests, "property exchange capabilities");

        if self.config.auto_query.resource_list {
            self.get_property(peer, resources::RESOURCE_LIST, None)?;
        }
        Ok(())
    }

    // ── Property Exchange: responder ──────────────────────────────────────────

    /// A Get, Set or Subscribe request (or a subscription push from a
    /// responder we subscribed to).
    fn on_property_request(
        &mut self,
        kind: RequestKind,
        chunk: &PropertyChunk,
        now: Instant,
    ) -> Result<(), CiError> {
        let source = chunk.common.source;
        let ChunkProgress::Complete { header, body } = self.request_chunks.accept(source, chunk, now)?
        else {
            return Ok(());
        };
        let header = match PropertyHeader::from_bytes(&header) {
            Ok(header) => header,
            Err(e) => {
                warn!(from = %source, error = %e, "unparseable property header");
                return self.send_error_reply(kind, chunk, status::BAD_REQUEST, &e.to_string());
            }
        };

        match kind {
            RequestKind::Get => match self.property_host.get(&header) {
                Ok(reply) => self.send_reply(kind, chunk, &reply),
                Err(e) => self.reject(kind, chunk, &e),
            },
            RequestKind::Set => match self.property_host.set(&header, &body) {
                Ok(outcome) => {
                    self.send_reply(kind, chunk, &outcome.reply)?;
                    let muid = self.muid();
                    self.messenger.publish(CiEvent::PropertyUpdated {
                        muid,
                        resource: outcome.resource.clone(),
                        res_id: outcome.res_id.clone(),
                    });
                    self.push_set(source, &outcome)
                }
                Err(e) => self.reject(kind, chunk, &e),
            },
            RequestKind::Subscribe => self.on_subscribe_message(chunk, &header, &body),
        }
    }

    fn on_subscribe_message(
        &mut self,
        chunk: &PropertyChunk,
        header: &PropertyHeader,
        body: &[u8],
    ) -> Result<(), CiError> {
        let source = chunk.common.source;
        match header.command {
            Some(SubscriptionCommand::Start) => self.host_subscribe(chunk, header),
            Some(SubscriptionCommand::End) if self.property_host.is_subscriber_end(source, header) => {
                self.host_subscribe(chunk, header)
            }
            Some(SubscriptionCommand::End) => self.on_subscription_ended(chunk, header),
            Some(command) => self.on_subscription_update(chunk, command, header, body),
            None => {
                warn!(from = %source, "subscribe message without command");
                self.send_error_reply(
                    RequestKind::Subscribe,
                    chunk,
                    status::BAD_REQUEST,
                    "missing command",
                )
            }
        }
    }

    /// `start`, or `end` of a subscription a peer holds with us.
    fn host_subscribe(&mut self, chunk: &PropertyChunk, header: &PropertyHeader) -> Result<(), CiError> {
        match self.property_host.subscribe(chunk.common.source, header) {
            Ok(reply) => self.send_reply(RequestKind::Subscribe, chunk, &reply),
            Err(e) => self.reject(RequestKind::Subscribe, chunk, &e),
        }
    }

    /// The responder ended a subscription we hold.
    fn on_subscription_ended(&mut self, chunk: &PropertyChunk, header: &PropertyHeader) -> Result<(), CiError> {
        let peer = chunk.common.source;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        let removed = header
            .subscribe_id
            .as_deref()
            .and_then(|id| conn.subscriptions.remove_by_subscribe_id(id));

        let Some(subscription) = removed else {
            warn!(%peer, subscribe_id = ?header.subscribe_id, "end for unknown subscription");
            return self.send_error_reply(
                RequestKind::Subscribe,
                chunk,
                status::NOT_FOUND,
                "unknown subscription",
            );
        };
        info!(%peer, resource = %subscription.resource, "subscription ended by responder");
        self.send_reply(RequestKind::Subscribe, chunk, &HostReply::ok())?;
        self.publish_subscription_state(
            peer,
            &subscription.resource,
            subscription.res_id.as_deref(),
            SubscriptionState::Unsubscribed,
        );
        Ok(())
    }

    /// `full`, `partial` or `notify` for a subscription we hold.
    fn on_subscription_update(
        &mut self,
        chunk: &PropertyChunk,
        command: SubscriptionCommand,
        header: &PropertyHeader,
        body: &[u8],
    ) -> Result<(), CiError> {
        let peer = chunk.common.source;
        let fallback = self.config.compat.accept_missing_subscribe_id;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        let target = conn
            .subscriptions
            .find_for_update(
                header.subscribe_id.as_deref(),
                header.resource.as_deref(),
                header.res_id.as_deref(),
                fallback,
            )
            .map(|s| (s.resource.clone(), s.res_id.clone()));
        let Some((resource, res_id)) = target else {
            warn!(%peer, subscribe_id = ?header.subscribe_id, ?command, "update for unknown subscription");
            return self.send_error_reply(
                RequestKind::Subscribe,
                chunk,
                status::NOT_FOUND,
                "unknown subscription",
            );
        };

        if command == SubscriptionCommand::Notify {
            self.send_reply(RequestKind::Subscribe, chunk, &HostReply::ok())?;
            self.get_property(peer, &resource, res_id.as_deref())?;
            return Ok(());
        }

        let update = header.encoding().and_then(|encoding| encoding.decode(body)).and_then(|decoded| {
            if command == SubscriptionCommand::Partial {
                let existing = conn
                    .properties
                    .value(&resource, res_id.as_deref())
                    .map(|v| v.body.as_slice());
                apply_partial_update(&resource, existing, &decoded)
            } else {
                Ok(decoded)
            }
        });
        match update {
            Ok(value) => {
                conn.properties
                    .set_value(PropertyValue::json(resource.clone(), res_id.clone(), value));
                debug!(%peer, %resource, ?command, "mirrored property updated");
                self.messenger.publish(CiEvent::PropertyUpdated {
                    muid: peer,
                    resource,
                    res_id,
                });
                self.send_reply(RequestKind::Subscribe, chunk, &HostReply::ok())
            }
            Err(e) => {
                warn!(%peer, %resource, error = %e, "subscription update dropped");
                self.reject(RequestKind::Subscribe, chunk, &HostError::from(e))
            }
        }
    }

    /// Forwards an inbound Set to every other subscriber of the resource.
    fn push_set(&mut self, setter: Muid, outcome: &SetOutcome) -> Result<(), CiError> {
        let command = if outcome.partial {
            SubscriptionCommand::Partial
        } else {
            SubscriptionCommand::Full
        };
        for subscriber in self
            .property_host
            .subscribers_of(&outcome.resource, outcome.res_id.as_deref())
        {
            if subscriber.muid == setter {
                continue;
            }
            let header = PropertyHeader::subscription(
                outcome.resource.clone(),
                command,
                Some(subscriber.subscribe_id),
            )
            .with_res_id(subscriber.res_id);
            self.push_to_subscriber(subscriber.muid, &header, &outcome.applied)?;
        }
        Ok(())
    }

    fn send_reply(&mut self, kind: RequestKind, request: &PropertyChunk, reply: &HostReply) -> Result<(), CiError> {
        let chunk_size = self.chunk_size_for(request.common.source);
        let common = self.messenger.reply_common(&request.common);
        let wrap: fn(PropertyChunk) -> Message = match kind {
            RequestKind::Get => Message::GetPropertyDataReply,
            RequestKind::Set => Message::SetPropertyDataReply,
            RequestKind::Subscribe => Message::SubscribePropertyReply,
        };
        self.messenger.send_property(
            wrap,
            common,
            request.request_id,
            &reply.header,
            &reply.body,
            chunk_size,
        )
    }

    fn send_error_reply(
        &mut self,
        kind: RequestKind,
        request: &PropertyChunk,
        status: u16,
        message: &str,
    ) -> Result<(), CiError> {
        let reply = HostReply {
            header: PropertyHeader::reply(status).with_message(message),
            body: Vec::new(),
        };
        self.send_reply(kind, request, &reply)
    }

    fn reject(&mut self, kind: RequestKind, request: &PropertyChunk, err: &HostError) -> Result<(), CiError> {
        warn!(from = %request.common.source, ?kind, status = err.status(), error = %err, "property request rejected");
        self.send_error_reply(kind, request, err.status(), &err.to_string())
    }

    // ── Property Exchange: initiator ──────────────────────────────────────────

    fn on_property_reply(
        &mut self,
        kind: RequestKind,
        chunk: &PropertyChunk,
        now: Instant,
    ) -> Result<(), CiError> {
        let peer = chunk.common.source;
        if !self.connections.contains_key(&peer) {
            if kind == RequestKind::Subscribe {
                // Acknowledgement of a push to one of our subscribers.
                debug!(%peer, request_id = chunk.request_id, "subscription push acknowledged");
                return Ok(());
            }
            return Err(CiError::NotConnected(peer));
        }

        let ChunkProgress::Complete { header, body } = self.reply_chunks.accept(peer, chunk, now)?
        else {
            return Ok(());
        };

        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        let Some(request) = conn.take_open_request(chunk.request_id) else {
            if kind == RequestKind::Subscribe {
                debug!(%peer, request_id = chunk.request_id, "subscription push acknowledged");
            } else {
                warn!(%peer, request_id = chunk.request_id, ?kind, "reply matches no open request");
            }
            return Ok(());
        };
        if request.kind != kind {
            warn!(%peer, request_id = chunk.request_id, expected = ?request.kind, got = ?kind, "reply kind mismatch");
            return Ok(());
        }

        let header = match PropertyHeader::from_bytes(&header) {
            Ok(header) => header,
            Err(e) => {
                let err = CiError::MalformedProperty(e);
                self.fail_request(peer, &request, &err, now);
                return Err(err);
            }
        };
        match kind {
            RequestKind::Get => {
                let failed = request.clone();
                let result = self.on_get_reply(peer, request, &header, &body);
                if let Err(err) = &result {
                    self.fail_request(peer, &failed, err, now);
                }
                result
            }
            RequestKind::Set => self.on_set_reply(peer, request, &header),
            RequestKind::Subscribe => {
                self.on_subscribe_reply(peer, &request, &header, now);
                Ok(())
            }
        }
    }

    /// Reports an open request whose reply could not be used.  A pending
    /// subscribe or unsubscribe is rolled back.
    fn fail_request(&mut self, peer: Muid, request: &OpenRequest, err: &CiError, now: Instant) {
        let resource = request.header.resource.clone().unwrap_or_default();
        if request.kind == RequestKind::Subscribe {
            let state = self
                .connections
                .get_mut(&peer)
                .and_then(|conn| conn.subscriptions.abandon(request.request_id, now));
            if let Some(state) = state {
                self.publish_subscription_state(peer, &resource, request.header.res_id.as_deref(), state);
            }
        }
        warn!(%peer, %resource, request_id = request.request_id, error = %err, "unusable property reply");
        self.messenger.publish(CiEvent::PropertyRequestFailed {
            muid: peer,
            resource,
            status: 0,
            message: Some(err.to_string()),
        });
    }

    fn on_get_reply(
        &mut self,
        peer: Muid,
        request: OpenRequest,
        header: &PropertyHeader,
        body: &[u8],
    ) -> Result<(), CiError> {
        let resource = request.header.resource.clone().unwrap_or_default();
        if !header.is_success() {
            self.publish_request_failure(peer, resource, header);
            return Ok(());
        }
        let decoded = header
            .encoding()
            .and_then(|encoding| encoding.decode(body))
            .map_err(CiError::MalformedProperty)?;
        let res_id = request.header.res_id.clone();
        let paginated = request.header.offset.is_some() || request.header.limit.is_some();

        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        let mut fetch_device_info = false;
        match resource.as_str() {
            resources::RESOURCE_LIST => {
                conn.properties.replace_metadata(
                    parse_resource_list(&decoded).map_err(CiError::MalformedProperty)?,
                );
                fetch_device_info = self.config.auto_query.device_info;
            }
            resources::DEVICE_INFO => {
                conn.device_info =
                    Some(parse_device_info(&decoded).map_err(CiError::MalformedProperty)?);
            }
            _ => {}
        }
        // A page is not the whole value.
        if !paginated {
            conn.properties
                .set_value(PropertyValue::json(resource.clone(), res_id.clone(), decoded));
        }
        debug!(%peer, %resource, "property received");
        self.messenger.publish(CiEvent::PropertyUpdated {
            muid: peer,
            resource,
            res_id,
        });

        if fetch_device_info {
            if let Err(e) = self.get_property(peer, resources::DEVICE_INFO, None) {
                warn!(%peer, error = %e, "DeviceInfo query failed");
            }
        }
        Ok(())
    }

    /// Mirrors the body we sent once the peer accepted it.
    fn on_set_reply(&mut self, peer: Muid, request: OpenRequest, header: &PropertyHeader) -> Result<(), CiError> {
        let resource = request.header.resource.clone().unwrap_or_default();
        if !header.is_success() {
            self.publish_request_failure(peer, resource, header);
            return Ok(());
        }
        let res_id = request.header.res_id.clone();
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        let value = if request.header.is_partial() {
            let existing = conn
                .properties
                .value(&resource, res_id.as_deref())
                .map(|v| v.body.as_slice());
            apply_partial_update(&resource, existing, &request.body)?
        } else {
            request.body
        };
        conn.properties
            .set_value(PropertyValue::json(resource.clone(), res_id.clone(), value));
        self.messenger.publish(CiEvent::PropertyUpdated {
            muid: peer,
            resource,
            res_id,
        });
        Ok(())
    }

    fn on_subscribe_reply(
        &mut self,
        peer: Muid,
        request: &OpenRequest,
        header: &PropertyHeader,
        now: Instant,
    ) {
        let accept_missing = self.config.compat.accept_missing_subscribe_id;
        let Some(conn) = self.connections.get_mut(&peer) else {
            return;
        };
        let outcome = conn.subscriptions.handle_reply(
            request.request_id,
            header.subscribe_id.as_deref(),
            header.is_success(),
            accept_missing,
            now,
        );
        match outcome {
            ReplyOutcome::Transitioned {
                resource,
                res_id,
                state,
            } => self.publish_subscription_state(peer, &resource, res_id.as_deref(), state),
            ReplyOutcome::MissingSubscribeId { resource } => self.publish_subscription_state(
                peer,
                &resource,
                request.header.res_id.as_deref(),
                SubscriptionState::Unsubscribed,
            ),
            ReplyOutcome::Stale { .. } | ReplyOutcome::Unmatched => {}
        }
        if !header.is_success() {
            let resource = request.header.resource.clone().unwrap_or_default();
            self.publish_request_failure(peer, resource, header);
        }
    }

    fn publish_request_failure(&mut self, peer: Muid, resource: String, header: &PropertyHeader) {
        let status = header.status.unwrap_or_default();
        warn!(%peer, %resource, status, message = ?header.message, "property request failed");
        self.messenger.publish(CiEvent::PropertyRequestFailed {
            muid: peer,
            resource,
            status,
            message: header.message.clone(),
        });
    }

    // ── Process Inquiry ───────────────────────────────────────────────────────

    fn on_process_inquiry(&mut self, inquiry: &Common) -> Result<(), CiError> {
        let common = self.messenger.reply_common(inquiry);
        self.messenger
            .send(Message::ProcessInquiryCapabilitiesReply(ProcessInquiryReply {
                common,
                supported_features: self.config.protocol.process_inquiry_features,
            }))
    }

    fn on_process_inquiry_reply(&mut self, reply: &ProcessInquiryReply) -> Result<(), CiError> {
        let peer = reply.common.source;
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(CiError::NotConnected(peer))?;
        conn.process_inquiry_features = Some(reply.supported_features);
        self.messenger.publish(CiEvent::ProcessInquiryReply {
            muid: peer,
            supported_features: reply.supported_features,
        });
        Ok(())
    }

    /// Replies with the supported subset of the requested bitmaps, streams
    /// the reporter's messages, then ends the report.
    fn on_midi_message_report(&mut self, request: &MidiMessageReport) -> Result<(), CiError> {
        let protocol = &self.config.protocol;
        if protocol.process_inquiry_features & report::FEATURE_MIDI_MESSAGE_REPORT == 0 {
            return self.messenger.send_nak(
                &request.common,
                MessageType::MidiMessageReport as u8,
                NakStatus::MessageNotSupported,
                "MIDI message report not supported",
            );
        }
        let common = self.messenger.reply_common(&request.common);
        let reply = MidiMessageReportReply {
            common,
            system_messages: request.system_messages & protocol.report_system_messages,
            channel_controller_messages: request.channel_controller_messages
                & protocol.report_channel_controller_messages,
            note_data_messages: request.note_data_messages & protocol.report_note_data_messages,
        };
        let filter = ReportRequest {
            group: common.group,
            address: common.address,
            message_data_control: request.message_data_control,
            system_messages: reply.system_messages,
            channel_controller_messages: reply.channel_controller_messages,
            note_data_messages: reply.note_data_messages,
        };
        self.messenger.send(Message::MidiMessageReportReply(reply))?;

        if request.message_data_control != report::DATA_CONTROL_NONE {
            if let Some(reporter) = self.reporter.as_mut() {
                let mut sent = 0usize;
                for bytes in reporter.report(&filter) {
                    self.messenger.send_midi(filter.group, &bytes);
                    sent += 1;
                }
                debug!(to = %request.common.source, sent, "MIDI message report streamed");
            }
        }
        self.messenger.send(Message::EndOfMidiMessageReport(common))
    }

    fn on_midi_message_report_reply(&mut self, reply: MidiMessageReportReply) -> Result<(), CiError> {
        let peer = reply.common.source;
        if !self.connections.contains_key(&peer) {
            return Err(CiError::NotConnected(peer));
        }
        self.messenger
            .publish(CiEvent::MidiMessageReportReply(reply));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::config::DeviceConfig;
    use crate::infrastructure::transport::QueueTransport;
    use midi_ci_core::{encode_message, ProfileId};

    const OWN: u32 = 0x10;
    const PEER: u32 = 0x20;

    fn muid(v: u32) -> Muid {
        Muid::new(v).unwrap()
    }

    fn device_with(config: DeviceConfig) -> (MidiCiDevice, QueueTransport) {
        let transport = QueueTransport::new();
        let device = MidiCiDevice::new(OWN, config, Box::new(transport.clone())).unwrap();
        (device, transport)
    }

    fn from_peer(address: Address) -> Common {
        Common::new(muid(PEER), muid(OWN), address, 0)
    }

    fn feed(device: &mut MidiCiDevice, message: &Message) {
        device.process_input(0, &encode_message(message).unwrap());
    }

    fn sent(transport: &QueueTransport) -> Vec<Message> {
        transport
            .drain()
            .into_iter()
            .map(|(group, bytes)| decode_message(group, &bytes).unwrap())
            .collect()
    }

    #[test]
    fn test_endpoint_inquiry_returns_product_instance_id() {
        // Arrange
        let mut config = DeviceConfig::default();
        config.identity.product_instance_id = "SN-7".to_string();
        let (mut device, transport) = device_with(config);

        // Act
        feed(
            &mut device,
            &Message::EndpointInquiry(EndpointInquiry {
                common: from_peer(Address::FUNCTION_BLOCK),
                status: ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
            }),
        );

        // Assert
        match &sent(&transport)[..] {
            [Message::EndpointReply(reply)] => {
                assert_eq!(reply.data, b"SN-7".to_vec());
                assert_eq!(reply.common.destination, muid(PEER));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_profile_on_wide_with_one_channel_stored_as_zero_in_compat_mode() {
        // Arrange
        let mut config = DeviceConfig::default();
        config.compat.profile_on_num_channels_one_for_wide = true;
        let (mut device, transport) = device_with(config);
        let id = ProfileId::standard(0, 0x21, 1, 1);
        device
            .add_local_profile(Profile::new(id, 0, Address::GROUP, false, 0))
            .unwrap();
        transport.drain();

        // Act
        feed(
            &mut device,
            &Message::SetProfileOn(ProfileChannels {
                common: from_peer(Address::GROUP),
                profile: id,
                num_channels: 1,
            }),
        );

        // Assert
        let profile = device.profile_host().get(&id, 0, Address::GROUP).unwrap();
        assert!(profile.enabled);
        assert_eq!(profile.num_channels, 0);
        assert!(matches!(&sent(&transport)[..], [Message::ProfileEnabled(r)] if r.num_channels == 0));
    }

    #[test]
    fn test_invalidating_own_muid_is_ignored() {
        let (mut device, transport) = device_with(DeviceConfig::default());
        let events = std::rc::Rc::new(std::cell::RefCell::new(0usize));
        let counter = std::rc::Rc::clone(&events);
        device.subscribe_events(move |e| {
            if matches!(e, CiEvent::ConnectionRemoved(_)) {
                *counter.borrow_mut() += 1;
            }
        });

        feed(
            &mut device,
            &Message::InvalidateMuid(InvalidateMuid {
                common: Common::new(muid(PEER), Muid::BROADCAST, Address::FUNCTION_BLOCK, 0),
                target: muid(OWN),
            }),
        );

        assert_eq!(*events.borrow(), 0);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_old_version_message_for_another_device_is_not_nakked() {
        // Arrange
        let (mut device, transport) = device_with(DeviceConfig::default());
        let common = Common::new(muid(PEER), muid(0x30), Address::FUNCTION_BLOCK, 0).with_version(0x01);

        // Act
        feed(
            &mut device,
            &Message::EndpointInquiry(EndpointInquiry {
                common,
                status: ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
            }),
        );

        // Assert
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_unparseable_request_header_gets_bad_request_reply() {
        // Arrange
        let (mut device, transport) = device_with(DeviceConfig::default());

        // Act
        feed(
            &mut device,
            &Message::GetPropertyData(PropertyChunk {
                common: from_peer(Address::FUNCTION_BLOCK),
                request_id: 4,
                header: b"{not json".to_vec(),
                num_chunks: 1,
                chunk_index: 1,
                body: Vec::new(),
            }),
        );

        // Assert
        match &sent(&transport)[..] {
            [Message::GetPropertyDataReply(reply)] => {
                assert_eq!(reply.request_id, 4);
                let header = PropertyHeader::from_bytes(&reply.header).unwrap();
                assert_eq!(header.status, Some(status::BAD_REQUEST));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_without_command_gets_bad_request_reply() {
        let (mut device, transport) = device_with(DeviceConfig::default());

        feed(
            &mut device,
            &Message::SubscribeProperty(PropertyChunk {
                common: from_peer(Address::FUNCTION_BLOCK),
                request_id: 8,
                header: br#"{"resource":"DeviceInfo"}"#.to_vec(),
                num_chunks: 1,
                chunk_index: 1,
                body: Vec::new(),
            }),
        );

        match &sent(&transport)[..] {
            [Message::SubscribePropertyReply(reply)] => {
                let header = PropertyHeader::from_bytes(&reply.header).unwrap();
                assert_eq!(header.status, Some(status::BAD_REQUEST));
                assert_eq!(header.message.as_deref(), Some("missing command"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_profile_inquiry_answers_each_address() {
        // Arrange
        let (mut device, transport) = device_with(DeviceConfig::default());
        let id = ProfileId::standard(0, 0x21, 1, 1);
        device
            .add_local_profile(Profile::new(id, 0, Address::channel(3), true, 1))
            .unwrap();
        transport.drain();

        // Act
        feed(&mut device, &Message::ProfileInquiry(from_peer(Address::FUNCTION_BLOCK)));

        // Assert
        let replies: Vec<_> = sent(&transport)
            .into_iter()
            .filter_map(|m| match m {
                Message::ProfileReply(r) => Some((r.common.address, r.enabled.len(), r.disabled.len())),
                _ => None,
            })
            .collect();
        assert_eq!(
            replies,
            vec![(Address::channel(3), 1, 0), (Address::FUNCTION_BLOCK, 0, 0)]
        );
    }
}

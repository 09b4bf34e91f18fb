//! The MIDI-CI device engine.
//!
//! [`MidiCiDevice`] is one MIDI-CI endpoint identified by a MUID.  It plays
//! both roles at once:
//!
//! - **Initiator** – discovers peers, keeps one [`ClientConnection`] per
//!   responder, queries and toggles their profiles, and gets, sets and
//!   subscribes to their properties.
//! - **Responder** – answers inquiries from the profiles in its
//!   [`ProfileHost`] and the properties in its [`PropertyHost`].
//!
//! This file holds construction, accessors and the outbound API.  Inbound
//! traffic enters through `process_input`, implemented in `dispatch.rs`.
//!
//! The engine is single-threaded and synchronous: every call runs to
//! completion on the caller's thread, sending through the transport as it
//! goes.  Nothing expires on its own; the embedder calls
//! [`MidiCiDevice::purge_expired`] periodically.

use std::collections::HashMap;
use std::time::Instant;

use midi_ci_core::property::PropertyError;
use midi_ci_core::protocol::{
    ChunkError, ChunkReassembler, Common, DiscoveryInquiry, EndpointInquiry, InvalidateMuid,
    MidiMessageReport, ProfileChannels, ProfileDetailsInquiry, ProfileReport, ProfileSpecificData,
    PropertyCapabilities, PropertyChunk, ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
};
use midi_ci_core::{
    Address, Message, Muid, MuidError, Profile, ProfileId, PropertyHeader, PropertyMetadata,
    ProtocolError, SubscriptionCommand,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, OpenRequest, RequestKind};
use super::messenger::Messenger;
use super::profile_host::ProfileHost;
use super::property_host::{HostError, PropertyHost};
use super::subscription::{SubscriptionError, SubscriptionState};
use crate::infrastructure::events::CiEvent;
use crate::infrastructure::storage::config::{ConfigError, DeviceConfig};
use crate::infrastructure::transport::{CiTransport, MidiMessageReporter};

/// Room left in a peer's SysEx limit for the envelope and header of a
/// Property Exchange chunk.
const HEADER_ALLOWANCE: usize = 256;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors returned by the engine.
///
/// Errors raised while handling an inbound message never escape
/// `process_input`: they become a NAK or an error reply to the sender, or a
/// log line.
#[derive(Debug, Error)]
pub enum CiError {
    /// The operation targets a MUID with no connection.
    #[error("no connection to {0}")]
    NotConnected(Muid),

    /// The broadcast MUID cannot identify a device.
    #[error("the broadcast MUID cannot be used as a device MUID")]
    BroadcastMuid,

    #[error(transparent)]
    Muid(#[from] MuidError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("property exchange chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("property error: {0}")]
    Property(#[from] PropertyError),

    /// A peer's Property Exchange header or body could not be decoded.
    #[error("malformed property data from peer: {0}")]
    MalformedProperty(#[source] PropertyError),

    #[error("subscription to {resource}: {source}")]
    Subscription {
        resource: String,
        #[source]
        source: SubscriptionError,
    },

    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),

    #[error("property request rejected: {0}")]
    Host(#[from] HostError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// One MIDI-CI endpoint.
pub struct MidiCiDevice {
    pub(crate) config: DeviceConfig,
    pub(crate) messenger: Messenger,
    /// Responders we discovered, keyed by their MUID.
    pub(crate) connections: HashMap<Muid, ClientConnection>,
    pub(crate) profile_host: ProfileHost,
    pub(crate) property_host: PropertyHost,
    /// Chunked requests from peers.  Request ids are chosen by the sender,
    /// so they share nothing with the ids of replies to our own requests.
    pub(crate) request_chunks: ChunkReassembler,
    /// Chunked replies to our requests.
    pub(crate) reply_chunks: ChunkReassembler,
    pub(crate) reporter: Option<Box<dyn MidiMessageReporter>>,
}

impl MidiCiDevice {
    /// Creates an engine with MUID `muid`.
    ///
    /// # Errors
    ///
    /// - [`CiError::Muid`] if a byte of `muid` has its high bit set;
    /// - [`CiError::BroadcastMuid`] for `0x7F7F7F7F`;
    /// - [`CiError::Config`] if `config` fails validation.
    pub fn new(
        muid: u32,
        config: DeviceConfig,
        transport: Box<dyn CiTransport>,
    ) -> Result<Self, CiError> {
        let muid = Muid::new(muid)?;
        if muid.is_broadcast() {
            return Err(CiError::BroadcastMuid);
        }
        config.validate()?;

        let messenger = Messenger::new(
            muid,
            config.protocol.ci_version,
            config.limits.max_sysex_size as usize,
            transport,
        );
        let property_host = PropertyHost::new(config.device_info());
        info!(%muid, group = config.protocol.group, "MIDI-CI device created");

        Ok(Self {
            config,
            messenger,
            connections: HashMap::new(),
            profile_host: ProfileHost::new(),
            property_host,
            request_chunks: ChunkReassembler::new(),
            reply_chunks: ChunkReassembler::new(),
            reporter: None,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn muid(&self) -> Muid {
        self.messenger.muid()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn connection(&self, muid: Muid) -> Option<&ClientConnection> {
        self.connections.get(&muid)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ClientConnection> {
        self.connections.values()
    }

    pub fn profile_host(&self) -> &ProfileHost {
        &self.profile_host
    }

    pub fn property_host(&self) -> &PropertyHost {
        &self.property_host
    }

    /// Registers an observer for every [`CiEvent`] published from now on.
    pub fn subscribe_events(&mut self, handler: impl FnMut(&CiEvent) + 'static) {
        self.messenger.events_mut().subscribe(handler);
    }

    /// Installs the source of MIDI Message Report content.
    pub fn set_midi_message_reporter(&mut self, reporter: Box<dyn MidiMessageReporter>) {
        self.reporter = Some(reporter);
    }

    /// Number of inbound chunked transfers still waiting for chunks.
    pub fn pending_chunk_transfers(&self) -> usize {
        self.request_chunks.pending_count() + self.reply_chunks.pending_count()
    }

    // ── Management ────────────────────────────────────────────────────────────

    /// Broadcasts a Discovery Inquiry on the configured group.
    pub fn send_discovery(&mut self) -> Result<(), CiError> {
        let common = self.messenger.common(
            Muid::BROADCAST,
            Address::FUNCTION_BLOCK,
            self.config.protocol.group,
        );
        let inquiry = DiscoveryInquiry {
            common,
            device: self.config.device_details(),
            categories: self.config.protocol.ci_category_supported,
            max_sysex_size: self.config.limits.max_sysex_size,
            output_path_id: self.config.protocol.output_path_id,
        };
        debug!(muid = %common.source, "sending discovery inquiry");
        self.messenger.send(Message::DiscoveryInquiry(inquiry))
    }

    /// Asks `target` for its product instance id.
    pub fn send_endpoint_inquiry(&mut self, target: Muid) -> Result<(), CiError> {
        let common = self.request_common(target, Address::FUNCTION_BLOCK);
        self.messenger.send(Message::EndpointInquiry(EndpointInquiry {
            common,
            status: ENDPOINT_STATUS_PRODUCT_INSTANCE_ID,
        }))
    }

    /// Broadcasts that `target` is no longer valid and forgets any
    /// connection to it.
    pub fn send_invalidate_muid(&mut self, target: Muid) -> Result<(), CiError> {
        let common = self.messenger.common(
            Muid::BROADCAST,
            Address::FUNCTION_BLOCK,
            self.config.protocol.group,
        );
        self.messenger
            .send(Message::InvalidateMuid(InvalidateMuid { common, target }))?;
        self.drop_connection(target);
        Ok(())
    }

    // ── Profile Configuration (initiator) ─────────────────────────────────────

    pub fn request_profiles(&mut self, target: Muid, address: Address) -> Result<(), CiError> {
        let common = self.request_common(target, address);
        self.messenger.send(Message::ProfileInquiry(common))
    }

    /// Sends Set Profile On (`enabled`) or Set Profile Off.
    ///
    /// Off always carries zero channels.  With
    /// `compat.profile_on_num_channels_one_for_wide`, On for a group or
    /// function block with zero channels is sent with one.
    pub fn set_remote_profile(
        &mut self,
        target: Muid,
        address: Address,
        profile: ProfileId,
        enabled: bool,
        num_channels: u16,
    ) -> Result<(), CiError> {
        let common = self.request_common(target, address);
        let message = if enabled {
            let num_channels = if num_channels == 0
                && address.is_wide()
                && self.config.compat.profile_on_num_channels_one_for_wide
            {
                1
            } else {
                num_channels
            };
            Message::SetProfileOn(ProfileChannels {
                common,
                profile,
                num_channels,
            })
        } else {
            Message::SetProfileOff(ProfileChannels {
                common,
                profile,
                num_channels: 0,
            })
        };
        self.messenger.send(message)
    }

    pub fn request_profile_details(
        &mut self,
        target: Muid,
        address: Address,
        profile: ProfileId,
        inquiry_target: u8,
    ) -> Result<(), CiError> {
        let common = self.request_common(target, address);
        self.messenger
            .send(Message::ProfileDetailsInquiry(ProfileDetailsInquiry {
                common,
                profile,
                target: inquiry_target,
            }))
    }

    /// Sends profile-defined data to `destination` (which may be broadcast).
    pub fn send_profile_specific_data(
        &mut self,
        destination: Muid,
        address: Address,
        profile: ProfileId,
        data: Vec<u8>,
    ) -> Result<(), CiError> {
        let common = self.request_common(destination, address);
        self.messenger
            .send(Message::ProfileSpecificData(ProfileSpecificData {
                common,
                profile,
                data,
            }))
    }

    // ── Property Exchange (initiator) ─────────────────────────────────────────

    pub fn request_property_capabilities(&mut self, target: Muid) -> Result<(), CiError> {
        let common = self.request_common(target, Address::FUNCTION_BLOCK);
        let inquiry = self.property_capabilities(common);
        self.messenger.send(Message::PropertyCapabilities(inquiry))
    }

    /// Gets `resource` from `target` and returns the request id.
    pub fn get_property(
        &mut self,
        target: Muid,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<u8, CiError> {
        let header = PropertyHeader::for_resource(resource).with_res_id(res_id.map(str::to_string));
        self.get_property_with(target, header)
    }

    /// Gets with a caller-built header (pagination, encoding, extra keys).
    pub fn get_property_with(
        &mut self,
        target: Muid,
        header: PropertyHeader,
    ) -> Result<u8, CiError> {
        let request_id = self.messenger.next_request_id();
        self.transmit_request(target, RequestKind::Get, request_id, header, Vec::new())?;
        Ok(request_id)
    }

    /// Sets `resource` on `target`; `body` is the decoded JSON body, or the
    /// patch object when `partial`.
    pub fn set_property(
        &mut self,
        target: Muid,
        resource: &str,
        res_id: Option<&str>,
        body: &[u8],
        partial: bool,
    ) -> Result<u8, CiError> {
        let header = PropertyHeader::for_resource(resource)
            .with_res_id(res_id.map(str::to_string))
            .with_partial(partial);
        let request_id = self.messenger.next_request_id();
        self.transmit_request(target, RequestKind::Set, request_id, header, body.to_vec())?;
        Ok(request_id)
    }

    /// Starts a subscription; the entry stays `Subscribing` until the reply.
    pub fn subscribe_property(
        &mut self,
        target: Muid,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<u8, CiError> {
        let request_id = self.messenger.next_request_id();
        let conn = self
            .connections
            .get_mut(&target)
            .ok_or(CiError::NotConnected(target))?;
        conn.subscriptions
            .begin_subscribe(resource, res_id, request_id, Instant::now())
            .map_err(|source| CiError::Subscription {
                resource: resource.to_string(),
                source,
            })?;

        let header = PropertyHeader::subscription(resource, SubscriptionCommand::Start, None)
            .with_res_id(res_id.map(str::to_string));
        if let Err(e) =
            self.transmit_request(target, RequestKind::Subscribe, request_id, header, Vec::new())
        {
            self.abandon_subscription_request(target, request_id);
            return Err(e);
        }
        self.publish_subscription_state(target, resource, res_id, SubscriptionState::Subscribing);
        Ok(request_id)
    }

    /// Ends a `Subscribed` subscription.
    pub fn unsubscribe_property(
        &mut self,
        target: Muid,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<u8, CiError> {
        let request_id = self.messenger.next_request_id();
        let conn = self
            .connections
            .get_mut(&target)
            .ok_or(CiError::NotConnected(target))?;
        let subscribe_id = conn
            .subscriptions
            .begin_unsubscribe(resource, res_id, request_id, Instant::now())
            .map_err(|source| CiError::Subscription {
                resource: resource.to_string(),
                source,
            })?;

        let header = PropertyHeader::subscription(resource, SubscriptionCommand::End, subscribe_id)
            .with_res_id(res_id.map(str::to_string));
        if let Err(e) =
            self.transmit_request(target, RequestKind::Subscribe, request_id, header, Vec::new())
        {
            self.abandon_subscription_request(target, request_id);
            return Err(e);
        }
        self.publish_subscription_state(target, resource, res_id, SubscriptionState::Unsubscribing);
        Ok(request_id)
    }

    // ── Process Inquiry (initiator) ───────────────────────────────────────────

    pub fn request_process_inquiry(&mut self, target: Muid) -> Result<(), CiError> {
        let common = self.request_common(target, Address::FUNCTION_BLOCK);
        self.messenger.send(Message::ProcessInquiryCapabilities(common))
    }

    pub fn request_midi_message_report(
        &mut self,
        target: Muid,
        address: Address,
        message_data_control: u8,
        system_messages: u8,
        channel_controller_messages: u8,
        note_data_messages: u8,
    ) -> Result<(), CiError> {
        let common = self.request_common(target, address);
        self.messenger
            .send(Message::MidiMessageReport(MidiMessageReport {
                common,
                message_data_control,
                system_messages,
                channel_controller_messages,
                note_data_messages,
            }))
    }

    // ── Local profiles ────────────────────────────────────────────────────────

    /// Adds a local profile and broadcasts Profile Added.  Returns `false`
    /// (and sends nothing) if it already exists.
    pub fn add_local_profile(&mut self, profile: Profile) -> Result<bool, CiError> {
        let (id, group, address) = (profile.id, profile.group, profile.address);
        if !self.profile_host.add(profile) {
            return Ok(false);
        }
        let common = self.messenger.common(Muid::BROADCAST, address, group);
        self.messenger
            .send(Message::ProfileAdded(ProfileReport { common, profile: id }))?;
        self.publish_local_profiles();
        Ok(true)
    }

    /// Removes a local profile and broadcasts Profile Removed.
    pub fn remove_local_profile(
        &mut self,
        id: &ProfileId,
        group: u8,
        address: Address,
    ) -> Result<(), CiError> {
        self.profile_host
            .remove(id, group, address)
            .ok_or(CiError::ProfileNotFound(*id))?;
        let common = self.messenger.common(Muid::BROADCAST, address, group);
        self.messenger
            .send(Message::ProfileRemoved(ProfileReport { common, profile: *id }))?;
        self.publish_local_profiles();
        Ok(())
    }

    /// Enables or disables a local profile and broadcasts the new state.
    pub fn set_local_profile_enabled(
        &mut self,
        id: &ProfileId,
        group: u8,
        address: Address,
        enabled: bool,
        num_channels: u16,
    ) -> Result<(), CiError> {
        let profile = self
            .profile_host
            .set_enabled(id, group, address, enabled, num_channels)
            .ok_or(CiError::ProfileNotFound(*id))?;
        self.report_profile_state(&profile)
    }

    /// Registers the Profile Details Reply data for (`id`, `target`).
    pub fn set_profile_details(&mut self, id: ProfileId, target: u8, data: Vec<u8>) {
        self.profile_host.set_details(id, target, data);
    }

    // ── Local properties ──────────────────────────────────────────────────────

    pub fn add_local_property(&mut self, metadata: PropertyMetadata) {
        self.property_host.add_metadata(metadata);
    }

    /// Unregisters a resource and ends every subscription to it.
    pub fn remove_local_property(&mut self, resource: &str) -> Result<(), CiError> {
        for subscriber in self.property_host.remove(resource) {
            let header = PropertyHeader::subscription(
                resource,
                SubscriptionCommand::End,
                Some(subscriber.subscribe_id),
            )
            .with_res_id(subscriber.res_id);
            self.push_to_subscriber(subscriber.muid, &header, &[])?;
        }
        Ok(())
    }

    /// Stores a new value and pushes it (`full`) to every subscriber.
    pub fn update_local_property(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        body: Vec<u8>,
    ) -> Result<(), CiError> {
        self.property_host.update_value(resource, res_id, body.clone())?;
        let muid = self.muid();
        self.messenger.publish(CiEvent::PropertyUpdated {
            muid,
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
        });

        for subscriber in self.property_host.subscribers_of(resource, res_id) {
            let header = PropertyHeader::subscription(
                resource,
                SubscriptionCommand::Full,
                Some(subscriber.subscribe_id),
            )
            .with_res_id(subscriber.res_id);
            self.push_to_subscriber(subscriber.muid, &header, &body)?;
        }
        Ok(())
    }

    /// Tells every subscriber of `resource` to fetch it again.  Returns the
    /// number of subscribers notified.
    pub fn notify_property_subscribers(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
    ) -> Result<usize, CiError> {
        let subscribers = self.property_host.subscribers_of(resource, res_id);
        for subscriber in &subscribers {
            let header = PropertyHeader::subscription(
                resource,
                SubscriptionCommand::Notify,
                Some(subscriber.subscribe_id.clone()),
            )
            .with_res_id(subscriber.res_id.clone());
            self.push_to_subscriber(subscriber.muid, &header, &[])?;
        }
        Ok(subscribers.len())
    }

    // ── Expiry ────────────────────────────────────────────────────────────────

    /// Drops open requests, pending subscriptions and partial chunk
    /// transfers older than their configured timeouts.
    pub fn purge_expired(&mut self, now: Instant) {
        let timeouts = &self.config.timeouts;
        let (request_timeout, subscription_timeout, chunk_timeout) = (
            timeouts.request_timeout(),
            timeouts.subscription_timeout(),
            timeouts.chunk_timeout(),
        );

        let mut events = Vec::new();
        for (muid, conn) in &mut self.connections {
            for request in conn.expire_requests(now, request_timeout) {
                warn!(%muid, request_id = request.request_id, kind = ?request.kind, "property request timed out");
                events.push(CiEvent::RequestExpired {
                    muid: *muid,
                    request_id: request.request_id,
                });
            }
            for subscription in conn.subscriptions.expire(now, subscription_timeout) {
                warn!(%muid, resource = %subscription.resource, state = ?subscription.state, "subscription timed out");
                events.push(CiEvent::SubscriptionStateChanged {
                    muid: *muid,
                    resource: subscription.resource,
                    res_id: subscription.res_id,
                    state: SubscriptionState::Unsubscribed,
                });
            }
        }
        let stalled = self
            .request_chunks
            .purge_older_than(now, chunk_timeout)
            .into_iter()
            .chain(self.reply_chunks.purge_older_than(now, chunk_timeout));
        for (muid, request_id) in stalled {
            warn!(%muid, request_id, "chunked transfer timed out");
            events.push(CiEvent::ChunkTransferExpired { muid, request_id });
        }

        for event in events {
            self.messenger.publish(event);
        }
    }

    // ── Internals shared with dispatch ────────────────────────────────────────

    /// Group requests to `target` go out on: the one it was discovered on,
    /// or the configured group.
    pub(crate) fn group_for(&self, target: Muid) -> u8 {
        self.connections
            .get(&target)
            .map_or(self.config.protocol.group, |c| c.group)
    }

    /// Largest Property Exchange chunk body to send to `peer`.
    pub(crate) fn chunk_size_for(&self, peer: Muid) -> usize {
        let own = self.config.limits.max_property_chunk_size;
        match self.connections.get(&peer) {
            Some(conn) if conn.max_sysex_size > 0 => own
                .min((conn.max_sysex_size as usize).saturating_sub(HEADER_ALLOWANCE))
                .max(1),
            _ => own,
        }
    }

    pub(crate) fn property_capabilities(&self, common: Common) -> PropertyCapabilities {
        PropertyCapabilities {
            common,
            max_simultaneous_requests: self.config.limits.max_simultaneous_property_requests,
            major_version: self.config.protocol.property_exchange_major_version,
            minor_version: self.config.protocol.property_exchange_minor_version,
        }
    }

    /// Removes the connection to `muid` and any partial transfer from it.
    pub(crate) fn drop_connection(&mut self, muid: Muid) -> bool {
        self.request_chunks.remove_source(muid);
        self.reply_chunks.remove_source(muid);
        if self.connections.remove(&muid).is_none() {
            return false;
        }
        info!(%muid, "connection removed");
        self.messenger.publish(CiEvent::ConnectionRemoved(muid));
        true
    }

    /// Broadcasts Profile Enabled / Disabled for `profile`.
    pub(crate) fn report_profile_state(&mut self, profile: &Profile) -> Result<(), CiError> {
        let common = self
            .messenger
            .common(Muid::BROADCAST, profile.address, profile.group);
        let report = ProfileChannels {
            common,
            profile: profile.id,
            num_channels: profile.num_channels,
        };
        let message = if profile.enabled {
            Message::ProfileEnabled(report)
        } else {
            Message::ProfileDisabled(report)
        };
        self.messenger.send(message)?;
        self.publish_local_profiles();
        Ok(())
    }

    /// Sends a peer-bound Subscribe message (`full`, `partial`, `notify` or
    /// `end`) to one of our subscribers.
    pub(crate) fn push_to_subscriber(
        &mut self,
        subscriber: Muid,
        header: &PropertyHeader,
        body: &[u8],
    ) -> Result<(), CiError> {
        let wire_body = header.encoding()?.encode(body)?;
        let chunk_size = self.chunk_size_for(subscriber);
        let common = self.request_common(subscriber, Address::FUNCTION_BLOCK);
        let request_id = self.messenger.next_request_id();
        debug!(%subscriber, command = ?header.command, resource = ?header.resource, "subscription push");
        self.messenger.send_property(
            Message::SubscribeProperty,
            common,
            request_id,
            header,
            &wire_body,
            chunk_size,
        )
    }

    pub(crate) fn publish_subscription_state(
        &mut self,
        muid: Muid,
        resource: &str,
        res_id: Option<&str>,
        state: SubscriptionState,
    ) {
        self.messenger.publish(CiEvent::SubscriptionStateChanged {
            muid,
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            state,
        });
    }

    fn publish_local_profiles(&mut self) {
        let muid = self.muid();
        self.messenger.publish(CiEvent::ProfilesUpdated { muid });
    }

    fn request_common(&self, target: Muid, address: Address) -> Common {
        self.messenger.common(target, address, self.group_for(target))
    }

    /// Encodes, chunks and sends a Property Exchange request and records it
    /// as open.
    /// Rolls back the tracker entry for a subscribe or unsubscribe that was
    /// never sent.
    fn abandon_subscription_request(&mut self, target: Muid, request_id: u8) {
        if let Some(conn) = self.connections.get_mut(&target) {
            conn.subscriptions.abandon(request_id, Instant::now());
        }
    }

    fn transmit_request(
        &mut self,
        target: Muid,
        kind: RequestKind,
        request_id: u8,
        header: PropertyHeader,
        body: Vec<u8>,
    ) -> Result<(), CiError> {
        let chunk_size = self.chunk_size_for(target);
        let wire_body = header.encoding()?.encode(&body)?;
        let conn = self
            .connections
            .get_mut(&target)
            .ok_or(CiError::NotConnected(target))?;
        if conn.open_requests().len() >= usize::from(conn.max_simultaneous_requests) {
            warn!(%target, limit = conn.max_simultaneous_requests, "exceeding peer's simultaneous request limit");
        }

        let common = self
            .messenger
            .common(target, Address::FUNCTION_BLOCK, conn.group);
        let wrap: fn(PropertyChunk) -> Message = match kind {
            RequestKind::Get => Message::GetPropertyData,
            RequestKind::Set => Message::SetPropertyData,
            RequestKind::Subscribe => Message::SubscribeProperty,
        };
        self.messenger
            .send_property(wrap, common, request_id, &header, &wire_body, chunk_size)?;
        debug!(%target, request_id, ?kind, resource = ?header.resource, "property request sent");

        conn.add_open_request(OpenRequest {
            request_id,
            kind,
            header,
            body,
            sent_at: Instant::now(),
        });
        Ok(())
    }
}

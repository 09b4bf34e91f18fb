//! Properties this device serves: the Common Rules responder.
//!
//! # Request handling
//!
//! Every inbound request becomes one call here that returns either a reply
//! (header plus wire-encoded body) or a [`HostError`].  The engine sends the
//! reply as-is, or turns the error into an error reply carrying
//! [`HostError::status`].  A failed request never changes stored state.
//!
//! `ResourceList` and `DeviceInfo` are answered from the registered metadata
//! and the configured identity; every other resource needs metadata
//! registered through [`PropertyHost::add_metadata`] and a stored value.
//!
//! # Subscribers
//!
//! A `start` command registers the requesting MUID and hands out a fresh
//! `subscribeId`.  After a value changes, the engine asks
//! [`PropertyHost::subscribers_of`] whom to push the update to.

use midi_ci_core::property::common_rules::{device_info_body, resource_list_body};
use midi_ci_core::property::{
    apply_partial_update, paginate, resources, status, BodyEncoding, PropertyError,
};
use midi_ci_core::{
    DeviceInfo, Muid, PropertyHeader, PropertyList, PropertyMetadata, PropertyValue,
    SetCapability, SubscriptionCommand,
};
use thiserror::Error;
use tracing::debug;

/// Why a request could not be served.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown resource {0}")]
    NotFound(String),

    #[error("operation not allowed on {0}")]
    NotAllowed(String),

    #[error("{0} requires a resId")]
    MissingResId(String),

    #[error("no subscription {0}")]
    UnknownSubscription(String),

    #[error("subscription command {0:?} is not valid in a request")]
    InvalidCommand(Option<SubscriptionCommand>),

    #[error(transparent)]
    Property(#[from] PropertyError),
}

impl HostError {
    /// Common Rules status code for the error reply.
    pub fn status(&self) -> u16 {
        match self {
            HostError::NotFound(_) | HostError::UnknownSubscription(_) => status::NOT_FOUND,
            HostError::NotAllowed(_) => status::NOT_ALLOWED,
            HostError::MissingResId(_) | HostError::InvalidCommand(_) => status::BAD_REQUEST,
            HostError::Property(PropertyError::UnsupportedEncoding(_)) => {
                status::UNSUPPORTED_MEDIA_TYPE
            }
            HostError::Property(PropertyError::NoExistingValue(_)) => status::NOT_FOUND,
            HostError::Property(_) => status::BAD_REQUEST,
        }
    }
}

/// A reply ready to be chunked and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct HostReply {
    pub header: PropertyHeader,
    /// Body in the encoding named by `header`.
    pub body: Vec<u8>,
}

impl HostReply {
    /// An empty 200 reply.
    pub fn ok() -> Self {
        Self {
            header: PropertyHeader::reply(status::OK),
            body: Vec::new(),
        }
    }
}

/// Result of a successful Set.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    pub reply: HostReply,
    pub resource: String,
    pub res_id: Option<String>,
    pub partial: bool,
    /// The decoded request body: the partial patch, or the new full value.
    pub applied: Vec<u8>,
}

/// A peer subscribed to one of our resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub muid: Muid,
    pub subscribe_id: String,
    pub resource: String,
    pub res_id: Option<String>,
}

/// The local property service.
#[derive(Debug, Clone)]
pub struct PropertyHost {
    properties: PropertyList,
    device_info: DeviceInfo,
    subscribers: Vec<Subscriber>,
    next_subscribe_id: u32,
}

impl PropertyHost {
    /// A host serving `device_info`, with `DeviceInfo` already listed.
    pub fn new(device_info: DeviceInfo) -> Self {
        let mut properties = PropertyList::new();
        properties.add_metadata(PropertyMetadata::new(resources::DEVICE_INFO));
        Self {
            properties,
            device_info,
            subscribers: Vec::new(),
            next_subscribe_id: 1,
        }
    }

    // ── Local management ──────────────────────────────────────────────────────

    /// Registers or replaces a resource's metadata.
    pub fn add_metadata(&mut self, metadata: PropertyMetadata) {
        debug!(resource = %metadata.resource, "local property registered");
        self.properties.add_metadata(metadata);
    }

    /// Unregisters a resource and returns the subscribers it had.
    pub fn remove(&mut self, resource: &str) -> Vec<Subscriber> {
        self.properties.remove(resource);
        let (gone, kept) = std::mem::take(&mut self.subscribers)
            .into_iter()
            .partition(|s| s.resource == resource);
        self.subscribers = kept;
        gone
    }

    /// Stores a new value for a registered resource.
    pub fn update_value(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        body: Vec<u8>,
    ) -> Result<(), HostError> {
        if self.properties.metadata(resource).is_none() {
            return Err(HostError::NotFound(resource.to_string()));
        }
        self.properties
            .set_value(PropertyValue::json(resource, res_id.map(str::to_string), body));
        Ok(())
    }

    pub fn set_device_info(&mut self, device_info: DeviceInfo) {
        self.device_info = device_info;
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Serves a Get.
    pub fn get(&self, header: &PropertyHeader) -> Result<HostReply, HostError> {
        let resource = header.require_resource()?;
        let encoding = header.encoding()?;

        let (body, paginatable) = match resource {
            resources::RESOURCE_LIST => (resource_list_body(self.properties.metadata_list())?, false),
            resources::DEVICE_INFO => (device_info_body(&self.device_info)?, false),
            _ => {
                let meta = self.readable_metadata(resource, header)?;
                if encoding != BodyEncoding::Ascii && !meta.supports_encoding(encoding.name()) {
                    return Err(PropertyError::UnsupportedEncoding(encoding.name().to_string()).into());
                }
                let value = self
                    .properties
                    .value(resource, header.res_id.as_deref())
                    .ok_or_else(|| HostError::NotFound(resource.to_string()))?;
                (value.body.clone(), meta.can_paginate)
            }
        };

        let mut reply = PropertyHeader::reply(status::OK).with_encoding(encoding);
        let body = if paginatable && (header.offset.is_some() || header.limit.is_some()) {
            let (page, total) = paginate(&body, header.offset, header.limit)?;
            reply.total_count = total;
            page
        } else {
            body
        };
        Ok(HostReply {
            header: reply,
            body: encoding.encode(&body)?,
        })
    }

    /// Serves a Set.
    pub fn set(&mut self, header: &PropertyHeader, body: &[u8]) -> Result<SetOutcome, HostError> {
        let resource = header.require_resource()?.to_string();
        if resources::is_builtin(&resource) {
            return Err(HostError::NotAllowed(resource));
        }
        let meta = self
            .properties
            .metadata(&resource)
            .ok_or_else(|| HostError::NotFound(resource.clone()))?;
        let partial = header.is_partial();
        match (meta.can_set, partial) {
            (SetCapability::None, _) | (SetCapability::Full, true) => {
                return Err(HostError::NotAllowed(resource));
            }
            _ => {}
        }
        if meta.require_res_id && header.res_id.is_none() {
            return Err(HostError::MissingResId(resource));
        }

        let decoded = header.encoding()?.decode(body)?;
        let res_id = header.res_id.clone();
        let new_value = if partial {
            let existing = self
                .properties
                .value(&resource, res_id.as_deref())
                .map(|v| v.body.as_slice());
            apply_partial_update(&resource, existing, &decoded)?
        } else {
            decoded.clone()
        };

        let mut value = PropertyValue::json(resource.clone(), res_id.clone(), new_value);
        if let Some(media_type) = &header.media_type {
            value.media_type = media_type.clone();
        }
        self.properties.set_value(value);
        debug!(%resource, ?res_id, partial, "local property set by peer");

        Ok(SetOutcome {
            reply: HostReply::ok(),
            resource,
            res_id,
            partial,
            applied: decoded,
        })
    }

    /// Serves a Subscribe request (`start` or `end`) from `source`.
    pub fn subscribe(&mut self, source: Muid, header: &PropertyHeader) -> Result<HostReply, HostError> {
        match header.command {
            Some(SubscriptionCommand::Start) => {
                let resource = header.require_resource()?;
                let meta = self.readable_metadata(resource, header)?;
                if !meta.can_subscribe {
                    return Err(HostError::NotAllowed(resource.to_string()));
                }
                let subscribe_id = self.allocate_subscribe_id();
                self.subscribers.push(Subscriber {
                    muid: source,
                    subscribe_id: subscribe_id.clone(),
                    resource: resource.to_string(),
                    res_id: header.res_id.clone(),
                });
                debug!(%source, resource, %subscribe_id, "subscriber added");
                let mut reply = HostReply::ok();
                reply.header.subscribe_id = Some(subscribe_id);
                Ok(reply)
            }
            Some(SubscriptionCommand::End) => {
                let index = self
                    .subscriber_index(source, header)
                    .ok_or_else(|| {
                        HostError::UnknownSubscription(
                            header.subscribe_id.clone().unwrap_or_default(),
                        )
                    })?;
                let removed = self.subscribers.remove(index);
                debug!(%source, subscribe_id = %removed.subscribe_id, "subscriber removed");
                Ok(HostReply::ok())
            }
            other => Err(HostError::InvalidCommand(other)),
        }
    }

    // ── Subscribers ───────────────────────────────────────────────────────────

    /// `true` if `header` ends a subscription `source` holds with us.
    pub fn is_subscriber_end(&self, source: Muid, header: &PropertyHeader) -> bool {
        header.command == Some(SubscriptionCommand::End)
            && self.subscriber_index(source, header).is_some()
    }

    pub fn subscribers_of(&self, resource: &str, res_id: Option<&str>) -> Vec<Subscriber> {
        self.subscribers
            .iter()
            .filter(|s| s.resource == resource && s.res_id.as_deref() == res_id)
            .cloned()
            .collect()
    }

    pub fn has_subscriber(&self, muid: Muid) -> bool {
        self.subscribers.iter().any(|s| s.muid == muid)
    }

    /// Forgets every subscription held by `muid`.
    pub fn remove_subscribers_of(&mut self, muid: Muid) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.muid != muid);
        before - self.subscribers.len()
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    fn subscriber_index(&self, source: Muid, header: &PropertyHeader) -> Option<usize> {
        match &header.subscribe_id {
            Some(id) => self
                .subscribers
                .iter()
                .position(|s| s.muid == source && &s.subscribe_id == id),
            None => {
                let resource = header.resource.as_deref()?;
                self.subscribers.iter().position(|s| {
                    s.muid == source && s.resource == resource && s.res_id == header.res_id
                })
            }
        }
    }

    fn allocate_subscribe_id(&mut self) -> String {
        let id = format!("{:08}", self.next_subscribe_id);
        self.next_subscribe_id = self.next_subscribe_id.wrapping_add(1).max(1);
        id
    }

    fn readable_metadata(
        &self,
        resource: &str,
        header: &PropertyHeader,
    ) -> Result<&PropertyMetadata, HostError> {
        let meta = self
            .properties
            .metadata(resource)
            .ok_or_else(|| HostError::NotFound(resource.to_string()))?;
        if !meta.can_get {
            return Err(HostError::NotAllowed(resource.to_string()));
        }
        if meta.require_res_id && header.res_id.is_none() {
            return Err(HostError::MissingResId(resource.to_string()));
        }
        Ok(meta)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

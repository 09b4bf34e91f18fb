//! Per-remote-device state held by the initiator.
//!
//! A [`ClientConnection`] is created when a Discovery Reply arrives and lives
//! until the peer's MUID is invalidated or the peer is discovered again.  It
//! mirrors what we have learned about the peer (identity, profiles,
//! properties) and tracks our outstanding Property Exchange requests and
//! subscriptions against it.

use std::time::{Duration, Instant};

use midi_ci_core::{DeviceDetails, DeviceInfo, Muid, ProfileList, PropertyHeader, PropertyList};

use super::subscription::SubscriptionTracker;

/// Which Property Exchange operation an open request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
    Subscribe,
}

/// A Property Exchange request awaiting its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub request_id: u8,
    pub kind: RequestKind,
    pub header: PropertyHeader,
    /// Decoded body we sent; used to mirror a successful Set.
    pub body: Vec<u8>,
    pub sent_at: Instant,
}

/// Everything the initiator knows about one responder.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub target_muid: Muid,
    /// Group the peer answered discovery on; requests go out on it.
    pub group: u8,
    pub device: DeviceDetails,
    /// Category bits from the Discovery Reply.
    pub categories: u8,
    pub max_sysex_size: u32,
    pub output_path_id: u8,
    pub function_block: u8,
    /// From the Property Exchange Capabilities Reply; 1 until then.
    pub max_simultaneous_requests: u8,
    pub product_instance_id: Option<String>,
    pub process_inquiry_features: Option<u8>,
    pub device_info: Option<DeviceInfo>,
    pub profiles: ProfileList,
    pub properties: PropertyList,
    pub subscriptions: SubscriptionTracker,
    open_requests: Vec<OpenRequest>,
}

impl ClientConnection {
    pub fn new(
        target_muid: Muid,
        group: u8,
        device: DeviceDetails,
        categories: u8,
        max_sysex_size: u32,
        output_path_id: u8,
        function_block: u8,
    ) -> Self {
        Self {
            target_muid,
            group,
            device,
            categories,
            max_sysex_size,
            output_path_id,
            function_block,
            max_simultaneous_requests: 1,
            product_instance_id: None,
            process_inquiry_features: None,
            device_info: None,
            profiles: ProfileList::new(),
            properties: PropertyList::new(),
            subscriptions: SubscriptionTracker::new(),
            open_requests: Vec::new(),
        }
    }

    /// Records a request.  A stale entry with the same id (the 7-bit
    /// counter wrapped) is replaced.
    pub fn add_open_request(&mut self, request: OpenRequest) {
        self.open_requests
            .retain(|r| r.request_id != request.request_id);
        self.open_requests.push(request);
    }

    /// Removes and returns the request a reply with `request_id` answers.
    pub fn take_open_request(&mut self, request_id: u8) -> Option<OpenRequest> {
        let index = self
            .open_requests
            .iter()
            .position(|r| r.request_id == request_id)?;
        Some(self.open_requests.remove(index))
    }

    /// Removes and returns requests older than `timeout`.
    pub fn expire_requests(&mut self, now: Instant, timeout: Duration) -> Vec<OpenRequest> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.open_requests)
            .into_iter()
            .partition(|r| now.saturating_duration_since(r.sent_at) > timeout);
        self.open_requests = kept;
        expired
    }

    pub fn open_requests(&self) -> &[OpenRequest] {
        &self.open_requests
    }

    /// `true` if the peer advertised every bit of `category`.
    pub fn supports(&self, category: u8) -> bool {
        self.categories & category == category
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midi_ci_core::protocol::categories;

    fn connection() -> ClientConnection {
        ClientConnection::new(
            Muid::new(0x20).unwrap(),
            0,
            DeviceDetails::new(0x030201, 0, 0, 0),
            categories::PROPERTY_EXCHANGE,
            4096,
            0,
            0x7F,
        )
    }

    fn request(request_id: u8, sent_at: Instant) -> OpenRequest {
        OpenRequest {
            request_id,
            kind: RequestKind::Get,
            header: PropertyHeader::for_resource("DeviceInfo"),
            body: Vec::new(),
            sent_at,
        }
    }

    #[test]
    fn test_take_open_request_matches_by_id_once() {
        // Arrange
        let now = Instant::now();
        let mut conn = connection();
        conn.add_open_request(request(3, now));

        // Act / Assert
        assert!(conn.take_open_request(4).is_none());
        assert_eq!(conn.take_open_request(3).unwrap().request_id, 3);
        assert!(conn.take_open_request(3).is_none());
    }

    #[test]
    fn test_reused_request_id_replaces_old_entry() {
        let now = Instant::now();
        let mut conn = connection();
        conn.add_open_request(request(3, now));
        conn.add_open_request(request(3, now));
        assert_eq!(conn.open_requests().len(), 1);
    }

    #[test]
    fn test_expire_requests_returns_only_old_ones() {
        // Arrange
        let start = Instant::now();
        let mut conn = connection();
        conn.add_open_request(request(1, start));
        conn.add_open_request(request(2, start + Duration::from_secs(5)));

        // Act
        let expired = conn.expire_requests(start + Duration::from_secs(12), Duration::from_secs(10));

        // Assert
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, 1);
        assert_eq!(conn.open_requests().len(), 1);
    }

    #[test]
    fn test_supports_checks_category_bits() {
        let conn = connection();
        assert!(conn.supports(categories::PROPERTY_EXCHANGE));
        assert!(!conn.supports(categories::PROFILE_CONFIGURATION));
    }
}

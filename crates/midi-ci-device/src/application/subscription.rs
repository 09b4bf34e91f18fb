//! Client-side subscription state machine.
//!
//! ```text
//!  subscribe()        OK reply           unsubscribe()       OK reply
//! ───────────► Subscribing ─────► Subscribed ─────► Unsubscribing ─────► (removed)
//!                   │                 ▲                   │
//!                   │ error reply     └───── error reply ─┘
//!                   ▼
//!               (removed)
//! ```
//!
//! A reply is matched to an entry by the `subscribeId` it carries, falling
//! back to the request id of the pending subscribe/unsubscribe.  A reply
//! that lands on an entry with nothing pending (already `Subscribed`) is a
//! duplicate or stale reply and causes no transition.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Lifecycle states of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Unsubscribing,
    /// Terminal; entries in this state are removed from the tracker.
    Unsubscribed,
}

/// One subscription held by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSubscription {
    pub resource: String,
    pub res_id: Option<String>,
    /// Assigned by the responder in its reply to `start`.
    pub subscribe_id: Option<String>,
    /// Request id of the subscribe or unsubscribe awaiting a reply.
    pub pending_request_id: Option<u8>,
    pub state: SubscriptionState,
    /// When the entry last changed state.
    pub updated_at: Instant,
}

/// Errors from local subscribe/unsubscribe calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("already subscribed")]
    AlreadySubscribed,
    #[error("no subscription")]
    NotFound,
    /// The entry is still waiting for its subscribe reply.
    #[error("subscribe reply still pending")]
    Pending,
    #[error("already unsubscribing")]
    AlreadyUnsubscribing,
}

/// What a reply did to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The matched entry moved to `state`.
    Transitioned {
        resource: String,
        res_id: Option<String>,
        state: SubscriptionState,
    },
    /// The matched entry had nothing pending; nothing changed.
    Stale { resource: String },
    /// The reply did not carry a `subscribeId` and the peer quirk is not
    /// accepted; the pending subscribe was dropped.
    MissingSubscribeId { resource: String },
    /// No entry matched.
    Unmatched,
}

/// Every subscription held against one remote device.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    entries: Vec<ClientSubscription>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new subscription in `Subscribing`.
    pub fn begin_subscribe(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        request_id: u8,
        now: Instant,
    ) -> Result<(), SubscriptionError> {
        if self.position(resource, res_id).is_some() {
            return Err(SubscriptionError::AlreadySubscribed);
        }
        self.entries.push(ClientSubscription {
            resource: resource.to_string(),
            res_id: res_id.map(str::to_string),
            subscribe_id: None,
            pending_request_id: Some(request_id),
            state: SubscriptionState::Subscribing,
            updated_at: now,
        });
        debug!(resource, request_id, "subscription → Subscribing");
        Ok(())
    }

    /// Moves a `Subscribed` entry to `Unsubscribing` and returns its
    /// `subscribeId` for the `end` header.
    pub fn begin_unsubscribe(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        request_id: u8,
        now: Instant,
    ) -> Result<Option<String>, SubscriptionError> {
        let index = self
            .position(resource, res_id)
            .ok_or(SubscriptionError::NotFound)?;
        let entry = &mut self.entries[index];
        match entry.state {
            SubscriptionState::Subscribed => {
                entry.state = SubscriptionState::Unsubscribing;
                entry.pending_request_id = Some(request_id);
                entry.updated_at = now;
                debug!(resource, request_id, "subscription → Unsubscribing");
                Ok(entry.subscribe_id.clone())
            }
            SubscriptionState::Unsubscribing => Err(SubscriptionError::AlreadyUnsubscribing),
            SubscriptionState::Subscribing => Err(SubscriptionError::Pending),
            SubscriptionState::Unsubscribed => Err(SubscriptionError::NotFound),
        }
    }

    /// Applies a Subscribe reply.
    ///
    /// `accept_missing_subscribe_id` lets a first reply without a
    /// `subscribeId` complete the subscription.
    pub fn handle_reply(
        &mut self,
        request_id: u8,
        subscribe_id: Option<&str>,
        success: bool,
        accept_missing_subscribe_id: bool,
        now: Instant,
    ) -> ReplyOutcome {
        let Some(index) = self.match_reply(request_id, subscribe_id) else {
            warn!(request_id, ?subscribe_id, "subscription reply matches no entry");
            return ReplyOutcome::Unmatched;
        };

        let entry = &mut self.entries[index];
        let resource = entry.resource.clone();
        let res_id = entry.res_id.clone();

        let next = match (entry.state, success) {
            (SubscriptionState::Subscribed | SubscriptionState::Unsubscribed, _) => {
                warn!(%resource, request_id, state = ?entry.state, "stale subscription reply ignored");
                return ReplyOutcome::Stale { resource };
            }
            (SubscriptionState::Subscribing, true) => {
                if subscribe_id.is_none() && !accept_missing_subscribe_id {
                    warn!(%resource, request_id, "subscription reply without subscribeId");
                    self.entries.remove(index);
                    return ReplyOutcome::MissingSubscribeId { resource };
                }
                if let Some(id) = subscribe_id {
                    entry.subscribe_id = Some(id.to_string());
                }
                SubscriptionState::Subscribed
            }
            (SubscriptionState::Subscribing, false) => SubscriptionState::Unsubscribed,
            (SubscriptionState::Unsubscribing, true) => SubscriptionState::Unsubscribed,
            (SubscriptionState::Unsubscribing, false) => SubscriptionState::Subscribed,
        };

        debug!(%resource, request_id, from = ?entry.state, to = ?next, "subscription transition");
        if next == SubscriptionState::Unsubscribed {
            self.entries.remove(index);
        } else {
            entry.state = next;
            entry.pending_request_id = None;
            entry.updated_at = now;
        }
        ReplyOutcome::Transitioned {
            resource,
            res_id,
            state: next,
        }
    }

    /// Undoes the subscribe or unsubscribe pending as `request_id`: a
    /// `Subscribing` entry is removed and an `Unsubscribing` one goes back to
    /// `Subscribed`.  Returns the state the entry ends in.
    pub fn abandon(&mut self, request_id: u8, now: Instant) -> Option<SubscriptionState> {
        let index = self
            .entries
            .iter()
            .position(|e| e.pending_request_id == Some(request_id))?;
        let entry = &mut self.entries[index];
        debug!(resource = %entry.resource, request_id, state = ?entry.state, "subscription request abandoned");
        if entry.state == SubscriptionState::Unsubscribing {
            entry.state = SubscriptionState::Subscribed;
            entry.pending_request_id = None;
            entry.updated_at = now;
            return Some(SubscriptionState::Subscribed);
        }
        self.entries.remove(index);
        Some(SubscriptionState::Unsubscribed)
    }

    /// Finds the entry a peer-initiated Subscribe message refers to.
    ///
    /// Matches `subscribeId` first; with `fallback_to_resource`, a message
    /// without one is matched on the resource instead.
    pub fn find_for_update(
        &self,
        subscribe_id: Option<&str>,
        resource: Option<&str>,
        res_id: Option<&str>,
        fallback_to_resource: bool,
    ) -> Option<&ClientSubscription> {
        if let Some(id) = subscribe_id {
            if let Some(entry) = self.entries.iter().find(|e| e.subscribe_id.as_deref() == Some(id)) {
                return Some(entry);
            }
        }
        if !fallback_to_resource {
            return None;
        }
        let resource = resource?;
        self.entries
            .iter()
            .find(|e| e.resource == resource && e.res_id.as_deref() == res_id)
    }

    /// Removes the entry with `subscribe_id` (the responder ended it).
    pub fn remove_by_subscribe_id(&mut self, subscribe_id: &str) -> Option<ClientSubscription> {
        let index = self
            .entries
            .iter()
            .position(|e| e.subscribe_id.as_deref() == Some(subscribe_id))?;
        Some(self.entries.remove(index))
    }

    /// Drops entries stuck in `Subscribing` or `Unsubscribing` for longer
    /// than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<ClientSubscription> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| {
                e.pending_request_id.is_some() && now.saturating_duration_since(e.updated_at) > timeout
            });
        self.entries = kept;
        expired
    }

    pub fn get(&self, resource: &str, res_id: Option<&str>) -> Option<&ClientSubscription> {
        self.position(resource, res_id).map(|i| &self.entries[i])
    }

    /// State of the subscription to `resource`; `Unsubscribed` when absent.
    pub fn state_of(&self, resource: &str, res_id: Option<&str>) -> SubscriptionState {
        self.get(resource, res_id)
            .map_or(SubscriptionState::Unsubscribed, |e| e.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSubscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, resource: &str, res_id: Option<&str>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.resource == resource && e.res_id.as_deref() == res_id)
    }

    fn match_reply(&self, request_id: u8, subscribe_id: Option<&str>) -> Option<usize> {
        if let Some(id) = subscribe_id {
            if let Some(i) = self
                .entries
                .iter()
                .position(|e| e.subscribe_id.as_deref() == Some(id))
            {
                return Some(i);
            }
        }
        self.entries
            .iter()
            .position(|e| e.pending_request_id == Some(request_id))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribed(tracker: &mut SubscriptionTracker, resource: &str, id: &str, now: Instant) {
        tracker.begin_subscribe(resource, None, 1, now).unwrap();
        tracker.handle_reply(1, Some(id), true, false, now);
    }

    #[test]
    fn test_subscribe_then_ok_reply_reaches_subscribed() {
        // Arrange
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();

        // Act
        tracker.begin_subscribe("X", None, 5, now).unwrap();
        let outcome = tracker.handle_reply(5, Some("12345678"), true, false, now);

        // Assert
        assert_eq!(
            outcome,
            ReplyOutcome::Transitioned {
                resource: "X".into(),
                res_id: None,
                state: SubscriptionState::Subscribed
            }
        );
        let entry = tracker.get("X", None).unwrap();
        assert_eq!(entry.subscribe_id.as_deref(), Some("12345678"));
        assert_eq!(entry.pending_request_id, None);
    }

    #[test]
    fn test_duplicate_reply_while_subscribed_causes_no_transition() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);

        let outcome = tracker.handle_reply(1, Some("abc"), true, false, now);

        assert_eq!(outcome, ReplyOutcome::Stale { resource: "X".into() });
        assert_eq!(tracker.state_of("X", None), SubscriptionState::Subscribed);
    }

    #[test]
    fn test_unsubscribe_then_ok_reply_removes_entry() {
        // Arrange
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);

        // Act
        let id = tracker.begin_unsubscribe("X", None, 9, now).unwrap();
        let outcome = tracker.handle_reply(9, Some("abc"), true, false, now);

        // Assert
        assert_eq!(id.as_deref(), Some("abc"));
        assert!(matches!(
            outcome,
            ReplyOutcome::Transitioned { state: SubscriptionState::Unsubscribed, .. }
        ));
        assert!(tracker.is_empty());
        assert_eq!(tracker.state_of("X", None), SubscriptionState::Unsubscribed);
    }

    #[test]
    fn test_reply_after_removal_is_unmatched() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);
        tracker.begin_unsubscribe("X", None, 9, now).unwrap();
        tracker.handle_reply(9, Some("abc"), true, false, now);

        assert_eq!(tracker.handle_reply(9, Some("abc"), true, false, now), ReplyOutcome::Unmatched);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unsubscribe_requires_subscribed_state() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();

        assert_eq!(
            tracker.begin_unsubscribe("X", None, 1, now),
            Err(SubscriptionError::NotFound)
        );

        tracker.begin_subscribe("X", None, 1, now).unwrap();
        assert_eq!(
            tracker.begin_unsubscribe("X", None, 2, now),
            Err(SubscriptionError::Pending)
        );

        tracker.handle_reply(1, Some("a"), true, false, now);
        tracker.begin_unsubscribe("X", None, 3, now).unwrap();
        assert_eq!(
            tracker.begin_unsubscribe("X", None, 4, now),
            Err(SubscriptionError::AlreadyUnsubscribing)
        );
    }

    #[test]
    fn test_subscribe_twice_is_rejected() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        tracker.begin_subscribe("X", None, 1, now).unwrap();
        assert_eq!(
            tracker.begin_subscribe("X", None, 2, now),
            Err(SubscriptionError::AlreadySubscribed)
        );
        // Same resource, different resId is a separate subscription.
        assert!(tracker.begin_subscribe("X", Some("a"), 3, now).is_ok());
    }

    #[test]
    fn test_error_reply_to_subscribe_removes_entry() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        tracker.begin_subscribe("X", None, 1, now).unwrap();

        tracker.handle_reply(1, None, false, false, now);

        assert!(tracker.is_empty());
    }

    #[test]
    fn test_error_reply_to_unsubscribe_restores_subscribed() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);
        tracker.begin_unsubscribe("X", None, 2, now).unwrap();

        tracker.handle_reply(2, Some("abc"), false, false, now);

        assert_eq!(tracker.state_of("X", None), SubscriptionState::Subscribed);
    }

    #[test]
    fn test_abandon_drops_subscribing_and_restores_unsubscribing() {
        // Arrange
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "Old", "abc", now);
        tracker.begin_unsubscribe("Old", None, 5, now).unwrap();
        tracker.begin_subscribe("New", None, 1, now).unwrap();

        // Act / Assert
        assert_eq!(tracker.abandon(1, now), Some(SubscriptionState::Unsubscribed));
        assert_eq!(tracker.abandon(5, now), Some(SubscriptionState::Subscribed));
        assert_eq!(tracker.abandon(9, now), None);
        assert_eq!(tracker.state_of("New", None), SubscriptionState::Unsubscribed);
        assert_eq!(tracker.state_of("Old", None), SubscriptionState::Subscribed);
        assert!(tracker.begin_subscribe("New", None, 6, now).is_ok());
    }

    #[test]
    fn test_missing_subscribe_id_rejected_unless_accepted() {
        let now = Instant::now();
        let mut strict = SubscriptionTracker::new();
        strict.begin_subscribe("X", None, 1, now).unwrap();
        assert_eq!(
            strict.handle_reply(1, None, true, false, now),
            ReplyOutcome::MissingSubscribeId { resource: "X".into() }
        );
        assert!(strict.is_empty());

        let mut lenient = SubscriptionTracker::new();
        lenient.begin_subscribe("X", None, 1, now).unwrap();
        lenient.handle_reply(1, None, true, true, now);
        assert_eq!(lenient.state_of("X", None), SubscriptionState::Subscribed);
        assert_eq!(lenient.get("X", None).unwrap().subscribe_id, None);
    }

    #[test]
    fn test_reply_prefers_subscribe_id_over_request_id() {
        // Arrange: "A" is subscribed as "id-a"; "B" is pending with request 7.
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        tracker.begin_subscribe("A", None, 7, now).unwrap();
        tracker.handle_reply(7, Some("id-a"), true, false, now);
        tracker.begin_subscribe("B", None, 7, now).unwrap();

        // Act: a late duplicate of A's reply reuses request id 7.
        let outcome = tracker.handle_reply(7, Some("id-a"), true, false, now);

        // Assert
        assert_eq!(outcome, ReplyOutcome::Stale { resource: "A".into() });
        assert_eq!(tracker.state_of("B", None), SubscriptionState::Subscribing);
    }

    #[test]
    fn test_find_for_update_falls_back_to_resource_only_when_allowed() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);

        assert!(tracker.find_for_update(Some("abc"), None, None, false).is_some());
        assert!(tracker.find_for_update(None, Some("X"), None, false).is_none());
        assert!(tracker.find_for_update(None, Some("X"), None, true).is_some());
    }

    #[test]
    fn test_expire_drops_only_pending_entries() {
        // Arrange
        let start = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "Done", "d", start);
        tracker.begin_subscribe("Stuck", None, 2, start).unwrap();

        // Act
        let expired = tracker.expire(start + Duration::from_secs(11), Duration::from_secs(10));

        // Assert
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].resource, "Stuck");
        assert_eq!(tracker.state_of("Done", None), SubscriptionState::Subscribed);
    }

    #[test]
    fn test_remove_by_subscribe_id() {
        let now = Instant::now();
        let mut tracker = SubscriptionTracker::new();
        subscribed(&mut tracker, "X", "abc", now);

        assert!(tracker.remove_by_subscribe_id("zzz").is_none());
        assert_eq!(tracker.remove_by_subscribe_id("abc").unwrap().resource, "X");
        assert!(tracker.is_empty());
    }
}

//! Profiles this device offers.
//!
//! The host only keeps state.  The engine turns each successful change into
//! the matching report message (Profile Added / Removed / Enabled /
//! Disabled) so the two never drift apart.

use std::collections::HashMap;

use midi_ci_core::{Address, Profile, ProfileId, ProfileList};
use tracing::debug;

/// Local profile registry plus Profile Details data.
#[derive(Debug, Clone, Default)]
pub struct ProfileHost {
    profiles: ProfileList,
    /// Inquiry target byte → reply data, per profile.
    details: HashMap<(ProfileId, u8), Vec<u8>>,
}

impl ProfileHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a profile; `false` if it is already present.
    pub fn add(&mut self, profile: Profile) -> bool {
        let (id, group, address) = (profile.id, profile.group, profile.address);
        let added = self.profiles.add(profile);
        if added {
            debug!(profile = %id, group, address = %address, "local profile added");
        }
        added
    }

    pub fn remove(&mut self, id: &ProfileId, group: u8, address: Address) -> Option<Profile> {
        let removed = self.profiles.remove(id, group, address);
        if removed.is_some() {
            self.details.retain(|(profile, _), _| profile != id);
            debug!(profile = %id, group, address = %address, "local profile removed");
        }
        removed
    }

    /// Enables or disables a profile and returns its new state.
    pub fn set_enabled(
        &mut self,
        id: &ProfileId,
        group: u8,
        address: Address,
        enabled: bool,
        num_channels: u16,
    ) -> Option<Profile> {
        let updated = self
            .profiles
            .set_enabled(id, group, address, enabled, num_channels)
            .cloned();
        if updated.is_some() {
            debug!(profile = %id, group, address = %address, enabled, num_channels, "local profile toggled");
        }
        updated
    }

    pub fn get(&self, id: &ProfileId, group: u8, address: Address) -> Option<&Profile> {
        self.profiles.get(id, group, address)
    }

    /// Addresses a Profile Inquiry to `requested` must be answered for.
    ///
    /// An inquiry to the whole function block is answered once per address
    /// that carries profiles, and always at least once for the function
    /// block itself.
    pub fn inquiry_addresses(&self, group: u8, requested: Address) -> Vec<Address> {
        if requested != Address::FUNCTION_BLOCK {
            return vec![requested];
        }
        let mut addresses = self.profiles.addresses(group);
        if !addresses.contains(&Address::FUNCTION_BLOCK) {
            addresses.push(Address::FUNCTION_BLOCK);
        }
        addresses
    }

    /// (enabled, disabled) ids at one address.
    pub fn reply_lists(&self, group: u8, address: Address) -> (Vec<ProfileId>, Vec<ProfileId>) {
        self.profiles.ids_at(group, address)
    }

    pub fn set_details(&mut self, id: ProfileId, target: u8, data: Vec<u8>) {
        self.details.insert((id, target), data);
    }

    pub fn details(&self, id: &ProfileId, target: u8) -> Option<&[u8]> {
        self.details.get(&(*id, target)).map(Vec::as_slice)
    }

    pub fn profiles(&self) -> &ProfileList {
        &self.profiles
    }
}

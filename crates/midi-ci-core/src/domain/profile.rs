//! MIDI-CI profiles: identifiers and the per-device profile list.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::muid::Address;

/// First byte of a standard (MMA/AMEI defined) profile id.
pub const STANDARD_PROFILE_TAG: u8 = 0x7E;

/// Size of a profile id on the wire.
pub const PROFILE_ID_SIZE: usize = 5;

/// 5-byte profile identifier.
///
/// Standard profiles start with `0x7E` followed by bank, number, version and
/// level.  Manufacturer profiles start with a 3-byte manufacturer id followed
/// by two manufacturer-defined bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub [u8; PROFILE_ID_SIZE]);

impl ProfileId {
    pub fn standard(bank: u8, number: u8, version: u8, level: u8) -> Self {
        ProfileId([STANDARD_PROFILE_TAG, bank, number, version, level])
    }

    pub fn manufacturer(manufacturer: [u8; 3], info1: u8, info2: u8) -> Self {
        ProfileId([manufacturer[0], manufacturer[1], manufacturer[2], info1, info2])
    }

    pub fn is_standard(&self) -> bool {
        self.0[0] == STANDARD_PROFILE_TAG
    }

    pub fn as_bytes(&self) -> &[u8; PROFILE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4]
        )
    }
}

/// A profile as configured on a device (or as reported by a remote one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub group: u8,
    pub address: Address,
    pub enabled: bool,
    /// Number of channels the profile spans; `0` for group/function-block wide.
    pub num_channels: u16,
}

impl Profile {
    pub fn new(id: ProfileId, group: u8, address: Address, enabled: bool, num_channels: u16) -> Self {
        Self {
            id,
            group,
            address,
            enabled,
            num_channels,
        }
    }

    fn matches(&self, id: &ProfileId, group: u8, address: Address) -> bool {
        self.id == *id && self.group == group && self.address == address
    }
}

/// Ordered list of profiles keyed by (id, group, address).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileList {
    profiles: Vec<Profile>,
}

impl ProfileList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a profile.  Returns `false` (and changes nothing) if a profile
    /// with the same id, group and address already exists.
    pub fn add(&mut self, profile: Profile) -> bool {
        if self.get(&profile.id, profile.group, profile.address).is_some() {
            return false;
        }
        self.profiles.push(profile);
        true
    }

    /// Removes and returns the matching profile.
    pub fn remove(&mut self, id: &ProfileId, group: u8, address: Address) -> Option<Profile> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.matches(id, group, address))?;
        Some(self.profiles.remove(index))
    }

    pub fn get(&self, id: &ProfileId, group: u8, address: Address) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.matches(id, group, address))
    }

    /// Updates the enabled flag and channel count.  Returns the updated
    /// profile, or `None` if no such profile exists.
    pub fn set_enabled(
        &mut self,
        id: &ProfileId,
        group: u8,
        address: Address,
        enabled: bool,
        num_channels: u16,
    ) -> Option<&Profile> {
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.matches(id, group, address))?;
        profile.enabled = enabled;
        profile.num_channels = num_channels;
        Some(profile)
    }

    /// Replaces every profile on (group, address) with the given lists, as
    /// reported by a Profile Inquiry Reply.
    pub fn replace_at(
        &mut self,
        group: u8,
        address: Address,
        enabled: &[ProfileId],
        disabled: &[ProfileId],
    ) {
        self.profiles
            .retain(|p| !(p.group == group && p.address == address));
        let num_channels = if address.is_channel() { 1 } else { 0 };
        for id in enabled {
            self.profiles
                .push(Profile::new(*id, group, address, true, num_channels));
        }
        for id in disabled {
            self.profiles
                .push(Profile::new(*id, group, address, false, num_channels));
        }
    }

    /// Profiles on (group, address), split into (enabled, disabled) ids.
    pub fn ids_at(&self, group: u8, address: Address) -> (Vec<ProfileId>, Vec<ProfileId>) {
        let mut enabled = Vec::new();
        let mut disabled = Vec::new();
        for p in self
            .profiles
            .iter()
            .filter(|p| p.group == group && p.address == address)
        {
            if p.enabled {
                enabled.push(p.id);
            } else {
                disabled.push(p.id);
            }
        }
        (enabled, disabled)
    }

    /// Distinct addresses that carry at least one profile in `group`.
    pub fn addresses(&self, group: u8) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .profiles
            .iter()
            .filter(|p| p.group == group)
            .map(|p| p.address)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

//! Device identity as carried by Discovery messages and the DeviceInfo resource.

use serde::{Deserialize, Serialize};

/// Identity fields carried in Discovery Inquiry / Reply.
///
/// `manufacturer` uses the low 24 bits (SysEx manufacturer ID, 1- or 3-byte
/// form).  All four fields are written to the wire byte-for-byte, least
/// significant byte first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDetails {
    pub manufacturer: u32,
    pub family: u16,
    pub model: u16,
    pub software_revision: u32,
}

impl DeviceDetails {
    pub fn new(manufacturer: u32, family: u16, model: u16, software_revision: u32) -> Self {
        Self {
            manufacturer: manufacturer & 0x00FF_FFFF,
            family,
            model,
            software_revision,
        }
    }

    pub fn manufacturer_bytes(&self) -> [u8; 3] {
        let b = self.manufacturer.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    pub fn family_bytes(&self) -> [u8; 2] {
        self.family.to_le_bytes()
    }

    pub fn model_bytes(&self) -> [u8; 2] {
        self.model.to_le_bytes()
    }

    pub fn software_revision_bytes(&self) -> [u8; 4] {
        self.software_revision.to_le_bytes()
    }
}

/// Contents of the Common Rules `DeviceInfo` resource.
///
/// Id arrays are the same bytes as [`DeviceDetails`]; the string fields are
/// human readable names and are not carried by Discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub manufacturer_id: Vec<u8>,
    pub family_id: Vec<u8>,
    pub model_id: Vec<u8>,
    pub version_id: Vec<u8>,
    pub manufacturer: String,
    pub family: String,
    pub model: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Builds the resource from the wire identity plus display names.
    pub fn from_details(
        details: &DeviceDetails,
        manufacturer: &str,
        family: &str,
        model: &str,
        version: &str,
        serial_number: Option<&str>,
    ) -> Self {
        Self {
            manufacturer_id: details.manufacturer_bytes().to_vec(),
            family_id: details.family_bytes().to_vec(),
            model_id: details.model_bytes().to_vec(),
            version_id: details.software_revision_bytes().to_vec(),
            manufacturer: manufacturer.to_string(),
            family: family.to_string(),
            model: model.to_string(),
            version: version.to_string(),
            serial_number: serial_number.map(str::to_string),
        }
    }
}

//! TOML-based configuration for one MIDI-CI device.
//!
//! `DeviceConfig` carries everything the engine needs that is not protocol
//! state: the identity reported in Discovery and `DeviceInfo`, size limits,
//! the values advertised in capability replies, which follow-up inquiries to
//! chain after discovery, interoperability switches and timeouts.
//!
//! ```toml
//! [identity]
//! manufacturer_id = 0x030201
//! manufacturer = "ACME"
//! product_instance_id = "SN-0001"
//!
//! [limits]
//! max_sysex_size = 4096
//!
//! [compat]
//! accept_missing_subscribe_id = true
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` fallback, so an empty file
//! (or no file at all) yields a working configuration and older files keep
//! loading after new fields are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use midi_ci_core::protocol::{categories, report, CI_VERSION_1_2, PRODUCT_INSTANCE_ID_MAX_LEN};
use midi_ci_core::{DeviceDetails, DeviceInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is outside what the protocol can carry.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub auto_query: AutoQueryConfig,
    #[serde(default)]
    pub compat: CompatConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Identity reported in Discovery, Endpoint and `DeviceInfo` replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// 3-byte SysEx manufacturer id, first byte in the low bits.
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u32,
    #[serde(default)]
    pub family_id: u16,
    #[serde(default)]
    pub model_id: u16,
    #[serde(default)]
    pub version_id: u32,
    #[serde(default = "default_name")]
    pub manufacturer: String,
    #[serde(default = "default_name")]
    pub family: String,
    #[serde(default = "default_name")]
    pub model: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Returned by Endpoint Inquiry; at most 16 ASCII characters.
    #[serde(default)]
    pub product_instance_id: String,
}

/// Size limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Largest SysEx message this device accepts, advertised in Discovery.
    #[serde(default = "default_max_sysex_size")]
    pub max_sysex_size: u32,
    /// Largest body slice per Property Exchange chunk.
    #[serde(default = "default_max_property_chunk_size")]
    pub max_property_chunk_size: usize,
    /// Advertised in Property Exchange Capabilities replies.
    #[serde(default = "default_max_simultaneous_requests")]
    pub max_simultaneous_property_requests: u8,
}

/// Values this device advertises on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Group used for messages this device originates.
    #[serde(default)]
    pub group: u8,
    #[serde(default = "default_ci_version")]
    pub ci_version: u8,
    /// Category bits sent in Discovery.
    #[serde(default = "default_categories")]
    pub ci_category_supported: u8,
    #[serde(default)]
    pub output_path_id: u8,
    #[serde(default = "default_function_block")]
    pub function_block: u8,
    #[serde(default)]
    pub property_exchange_major_version: u8,
    #[serde(default)]
    pub property_exchange_minor_version: u8,
    #[serde(default = "default_process_inquiry_features")]
    pub process_inquiry_features: u8,
    /// Supported MIDI Message Report bitmaps.
    #[serde(default = "default_report_system")]
    pub report_system_messages: u8,
    #[serde(default = "default_report_channel_controller")]
    pub report_channel_controller_messages: u8,
    #[serde(default = "default_report_note_data")]
    pub report_note_data_messages: u8,
}

/// Follow-up requests sent automatically after a peer is discovered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoQueryConfig {
    #[serde(default = "default_true")]
    pub endpoint_inquiry: bool,
    #[serde(default = "default_true")]
    pub profile_inquiry: bool,
    #[serde(default = "default_true")]
    pub property_capabilities: bool,
    #[serde(default = "default_true")]
    pub process_inquiry: bool,
    /// Get `ResourceList` after a Property Exchange Capabilities reply.
    #[serde(default = "default_true")]
    pub resource_list: bool,
    /// Get `DeviceInfo` after a `ResourceList` reply.
    #[serde(default = "default_true")]
    pub device_info: bool,
}

/// Workarounds for peers that deviate from the MIDI-CI standard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompatConfig {
    /// Send and accept `numChannelsRequested = 1` for group and
    /// function-block wide profiles.
    #[serde(default)]
    pub profile_on_num_channels_one_for_wide: bool,
    /// Accept a first subscription reply without `subscribeId`.
    #[serde(default)]
    pub accept_missing_subscribe_id: bool,
}

/// Eviction ages used by `purge_expired`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_subscription_timeout_ms")]
    pub subscription_timeout_ms: u64,
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_manufacturer_id() -> u32 {
    // Non-commercial / educational id.
    0x7D
}
fn default_name() -> String {
    "Unknown".to_string()
}
fn default_version() -> String {
    "1.0".to_string()
}
fn default_max_sysex_size() -> u32 {
    4096
}
fn default_max_property_chunk_size() -> usize {
    4096 - 256
}
fn default_max_simultaneous_requests() -> u8 {
    127
}
fn default_ci_version() -> u8 {
    CI_VERSION_1_2
}
fn default_categories() -> u8 {
    categories::PROFILE_CONFIGURATION | categories::PROPERTY_EXCHANGE | categories::PROCESS_INQUIRY
}
fn default_function_block() -> u8 {
    0x7F
}
fn default_process_inquiry_features() -> u8 {
    report::FEATURE_MIDI_MESSAGE_REPORT
}
fn default_report_system() -> u8 {
    report::SYSTEM_MTC_QUARTER_FRAME | report::SYSTEM_SONG_POSITION | report::SYSTEM_SONG_SELECT
}
fn default_report_channel_controller() -> u8 {
    0x3F
}
fn default_report_note_data() -> u8 {
    0x0F
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_subscription_timeout_ms() -> u64 {
    10_000
}
fn default_chunk_timeout_ms() -> u64 {
    30_000
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: default_manufacturer_id(),
            family_id: 0,
            model_id: 0,
            version_id: 0,
            manufacturer: default_name(),
            family: default_name(),
            model: default_name(),
            version: default_version(),
            serial_number: None,
            product_instance_id: String::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sysex_size: default_max_sysex_size(),
            max_property_chunk_size: default_max_property_chunk_size(),
            max_simultaneous_property_requests: default_max_simultaneous_requests(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            group: 0,
            ci_version: default_ci_version(),
            ci_category_supported: default_categories(),
            output_path_id: 0,
            function_block: default_function_block(),
            property_exchange_major_version: 0,
            property_exchange_minor_version: 0,
            process_inquiry_features: default_process_inquiry_features(),
            report_system_messages: default_report_system(),
            report_channel_controller_messages: default_report_channel_controller(),
            report_note_data_messages: default_report_note_data(),
        }
    }
}

impl Default for AutoQueryConfig {
    fn default() -> Self {
        Self {
            endpoint_inquiry: default_true(),
            profile_inquiry: default_true(),
            property_capabilities: default_true(),
            process_inquiry: default_true(),
            resource_list: default_true(),
            device_info: default_true(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            subscription_timeout_ms: default_subscription_timeout_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl DeviceConfig {
    /// The wire identity sent in Discovery messages.
    pub fn device_details(&self) -> DeviceDetails {
        DeviceDetails::new(
            self.identity.manufacturer_id,
            self.identity.family_id,
            self.identity.model_id,
            self.identity.version_id,
        )
    }

    /// The body of the `DeviceInfo` resource.
    pub fn device_info(&self) -> DeviceInfo {
        let identity = &self.identity;
        DeviceInfo::from_details(
            &self.device_details(),
            &identity.manufacturer,
            &identity.family,
            &identity.model,
            &identity.version,
            identity.serial_number.as_deref(),
        )
    }

    /// Checks the values that cannot be represented on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pid = &self.identity.product_instance_id;
        if pid.len() > PRODUCT_INSTANCE_ID_MAX_LEN || !pid.bytes().all(|b| (0x20..0x7F).contains(&b)) {
            return Err(ConfigError::Invalid {
                field: "identity.product_instance_id",
                reason: format!("must be at most {PRODUCT_INSTANCE_ID_MAX_LEN} printable ASCII characters"),
            });
        }
        if self.limits.max_sysex_size > 0x0FFF_FFFF {
            return Err(ConfigError::Invalid {
                field: "limits.max_sysex_size",
                reason: "exceeds 28 bits".to_string(),
            });
        }
        if self.limits.max_property_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_property_chunk_size",
                reason: "must be non-zero".to_string(),
            });
        }
        let seven_bit = [
            ("protocol.group", self.protocol.group),
            ("protocol.ci_version", self.protocol.ci_version),
            ("protocol.ci_category_supported", self.protocol.ci_category_supported),
            ("protocol.output_path_id", self.protocol.output_path_id),
            ("protocol.function_block", self.protocol.function_block),
            ("limits.max_simultaneous_property_requests", self.limits.max_simultaneous_property_requests),
        ];
        if let Some((field, value)) = seven_bit.into_iter().find(|(_, v)| *v > 0x7F) {
            return Err(ConfigError::Invalid {
                field,
                reason: format!("{value:#04x} is not a 7-bit value"),
            });
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

impl DeviceConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: DeviceConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serializes to pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads a config file, returning `DeviceConfig::default()` if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and the errors of [`DeviceConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Writes the config to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

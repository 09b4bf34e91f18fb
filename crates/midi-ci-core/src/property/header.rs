//! Typed Common Rules header.
//!
//! Only the keys this crate acts on are typed; anything else a peer sends is
//! kept in `extra` and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::encoding::BodyEncoding;
use super::{json, PropertyError};

/// `command` values of Subscribe messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionCommand {
    Start,
    Partial,
    Full,
    Notify,
    End,
}

/// A Property Exchange header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutual_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_partial: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<SubscriptionCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Item count of a paginated list, set on paginated replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertyHeader {
    /// A request header naming `resource`.
    pub fn for_resource(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            ..Self::default()
        }
    }

    /// A reply header carrying `status`.
    pub fn reply(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A Subscribe header with `command` for `resource`.
    pub fn subscription(
        resource: impl Into<String>,
        command: SubscriptionCommand,
        subscribe_id: Option<String>,
    ) -> Self {
        Self {
            resource: Some(resource.into()),
            command: Some(command),
            subscribe_id,
            ..Self::default()
        }
    }

    pub fn with_res_id(mut self, res_id: Option<String>) -> Self {
        self.res_id = res_id;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.mutual_encoding = match encoding {
            BodyEncoding::Ascii => None,
            other => Some(other.name().to_string()),
        };
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.set_partial = partial.then_some(true);
        self
    }

    /// Parses a header from its wire bytes.  An empty header is an empty
    /// object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PropertyError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        json::from_bytes(bytes)
    }

    /// Serializes to 7-bit clean JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PropertyError> {
        json::to_bytes(self)
    }

    /// The resource name, or [`PropertyError::MissingResource`].
    pub fn require_resource(&self) -> Result<&str, PropertyError> {
        self.resource
            .as_deref()
            .ok_or(PropertyError::MissingResource)
    }

    /// The body encoding; ASCII when `mutualEncoding` is absent.
    pub fn encoding(&self) -> Result<BodyEncoding, PropertyError> {
        match self.mutual_encoding.as_deref() {
            None => Ok(BodyEncoding::Ascii),
            Some(name) => BodyEncoding::from_name(name),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.set_partial.unwrap_or(false)
    }

    /// `true` when the status is absent or 2xx.
    pub fn is_success(&self) -> bool {
        self.status.map_or(true, |s| (200..300).contains(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_serializes_only_present_keys() {
        let header = PropertyHeader::for_resource("DeviceInfo");
        assert_eq!(header.to_bytes().unwrap(), br#"{"resource":"DeviceInfo"}"#);
    }

    #[test]
    fn test_all_known_keys_use_wire_names() {
        // Arrange
        let text = br#"{"resource":"X","resId":"a","mutualEncoding":"Mcoded7","status":200,
            "message":"ok","cacheTime":10,"mediaType":"application/json","setPartial":true,
            "command":"notify","subscribeId":"s1","offset":2,"limit":5}"#;

        // Act
        let header = PropertyHeader::from_bytes(text).unwrap();

        // Assert
        assert_eq!(header.res_id.as_deref(), Some("a"));
        assert_eq!(header.encoding().unwrap(), BodyEncoding::Mcoded7);
        assert_eq!(header.status, Some(200));
        assert_eq!(header.cache_time, Some(10));
        assert!(header.is_partial());
        assert_eq!(header.command, Some(SubscriptionCommand::Notify));
        assert_eq!(header.subscribe_id.as_deref(), Some("s1"));
        assert_eq!((header.offset, header.limit), (Some(2), Some(5)));
        assert!(header.extra.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let header = PropertyHeader::from_bytes(br#"{"resource":"X","vendorKey":[1,2]}"#).unwrap();
        let bytes = header.to_bytes().unwrap();
        let value = json::parse(&bytes).unwrap();
        assert_eq!(value["vendorKey"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_empty_header_is_default() {
        let header = PropertyHeader::from_bytes(b"").unwrap();
        assert_eq!(header, PropertyHeader::default());
        assert!(matches!(
            header.require_resource(),
            Err(PropertyError::MissingResource)
        ));
    }

    #[test]
    fn test_invalid_header_is_a_typed_error() {
        assert!(matches!(
            PropertyHeader::from_bytes(b"{\"resource\":"),
            Err(PropertyError::Json(_))
        ));
    }

    #[test]
    fn test_success_status_range() {
        assert!(PropertyHeader::reply(200).is_success());
        assert!(PropertyHeader::reply(202).is_success());
        assert!(!PropertyHeader::reply(404).is_success());
        assert!(PropertyHeader::default().is_success());
    }
}

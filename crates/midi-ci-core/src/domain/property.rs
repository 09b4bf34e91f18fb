//! Property Exchange resources: metadata (one ResourceList entry) and values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default media type of a Common Rules resource.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Whether and how a resource can be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetCapability {
    #[default]
    None,
    Full,
    Partial,
}

/// A column description used by list resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub title: String,
}

/// Metadata for one resource, serialized as a ResourceList entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMetadata {
    pub resource: String,
    #[serde(default = "default_true")]
    pub can_get: bool,
    #[serde(default)]
    pub can_set: SetCapability,
    #[serde(default)]
    pub can_subscribe: bool,
    #[serde(default)]
    pub require_res_id: bool,
    #[serde(default = "default_media_types")]
    pub media_types: Vec<String>,
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub can_paginate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<PropertyColumn>,
}

fn default_true() -> bool {
    true
}

fn default_media_types() -> Vec<String> {
    vec![MEDIA_TYPE_JSON.to_string()]
}

fn default_encodings() -> Vec<String> {
    vec!["ASCII".to_string()]
}

impl PropertyMetadata {
    /// A readable, non-writable, non-subscribable JSON resource.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            can_get: true,
            can_set: SetCapability::None,
            can_subscribe: false,
            require_res_id: false,
            media_types: default_media_types(),
            encodings: default_encodings(),
            schema: None,
            can_paginate: false,
            columns: Vec::new(),
        }
    }

    pub fn with_set(mut self, can_set: SetCapability) -> Self {
        self.can_set = can_set;
        self
    }

    pub fn with_subscribe(mut self, can_subscribe: bool) -> Self {
        self.can_subscribe = can_subscribe;
        self
    }

    pub fn with_encodings(mut self, encodings: &[&str]) -> Self {
        self.encodings = encodings.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_pagination(mut self, can_paginate: bool) -> Self {
        self.can_paginate = can_paginate;
        self
    }

    pub fn with_res_id(mut self, require_res_id: bool) -> Self {
        self.require_res_id = require_res_id;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn supports_encoding(&self, encoding: &str) -> bool {
        self.encodings.iter().any(|e| e == encoding)
    }
}

/// The current value of a resource (decoded body bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub id: String,
    pub res_id: Option<String>,
    pub media_type: String,
    pub body: Vec<u8>,
}

impl PropertyValue {
    pub fn json(id: impl Into<String>, res_id: Option<String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            res_id,
            media_type: MEDIA_TYPE_JSON.to_string(),
            body,
        }
    }
}

/// Metadata plus values for every resource known for one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyList {
    metadata: Vec<PropertyMetadata>,
    values: Vec<PropertyValue>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the metadata for `metadata.resource`.
    pub fn add_metadata(&mut self, metadata: PropertyMetadata) {
        match self
            .metadata
            .iter_mut()
            .find(|m| m.resource == metadata.resource)
        {
            Some(existing) => *existing = metadata,
            None => self.metadata.push(metadata),
        }
    }

    /// Replaces the whole metadata list (e.g. from a ResourceList reply).
    pub fn replace_metadata(&mut self, metadata: Vec<PropertyMetadata>) {
        self.metadata = metadata;
    }

    /// Removes a resource and all of its values.
    pub fn remove(&mut self, resource: &str) -> bool {
        let before = self.metadata.len();
        self.metadata.retain(|m| m.resource != resource);
        self.values.retain(|v| v.id != resource);
        self.metadata.len() != before
    }

    pub fn metadata(&self, resource: &str) -> Option<&PropertyMetadata> {
        self.metadata.iter().find(|m| m.resource == resource)
    }

    pub fn metadata_list(&self) -> &[PropertyMetadata] {
        &self.metadata
    }

    pub fn value(&self, resource: &str, res_id: Option<&str>) -> Option<&PropertyValue> {
        self.values
            .iter()
            .find(|v| v.id == resource && v.res_id.as_deref() == res_id)
    }

    /// Inserts or replaces the value keyed by (id, res_id).
    pub fn set_value(&mut self, value: PropertyValue) {
        match self
            .values
            .iter_mut()
            .find(|v| v.id == value.id && v.res_id == value.res_id)
        {
            Some(existing) => *existing = value,
            None => self.values.push(value),
        }
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_as_resource_list_entry() {
        let meta = PropertyMetadata::new("X")
            .with_set(SetCapability::Partial)
            .with_subscribe(true);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["resource"], "X");
        assert_eq!(json["canSet"], "partial");
        assert_eq!(json["canSubscribe"], true);
        assert_eq!(json["mediaTypes"], serde_json::json!(["application/json"]));
        assert!(json.get("schema").is_none());
    }

    #[test]
    fn test_metadata_defaults_apply_when_deserializing_minimal_entry() {
        let meta: PropertyMetadata =
            serde_json::from_str(r#"{"resource":"ChannelList"}"#).unwrap();
        assert!(meta.can_get);
        assert_eq!(meta.can_set, SetCapability::None);
        assert_eq!(meta.encodings, vec!["ASCII".to_string()]);
    }

    #[test]
    fn test_set_value_upserts_by_id_and_res_id() {
        let mut list = PropertyList::new();
        list.set_value(PropertyValue::json("X", None, b"1".to_vec()));
        list.set_value(PropertyValue::json("X", Some("a".into()), b"2".to_vec()));
        list.set_value(PropertyValue::json("X", None, b"3".to_vec()));

        assert_eq!(list.values().len(), 2);
        assert_eq!(list.value("X", None).unwrap().body, b"3");
        assert_eq!(list.value("X", Some("a")).unwrap().body, b"2");
    }

    #[test]
    fn test_remove_drops_metadata_and_values() {
        let mut list = PropertyList::new();
        list.add_metadata(PropertyMetadata::new("X"));
        list.set_value(PropertyValue::json("X", None, b"{}".to_vec()));
        assert!(list.remove("X"));
        assert!(list.metadata("X").is_none());
        assert!(list.value("X", None).is_none());
        assert!(!list.remove("X"));
    }
}

//! Common Rules semantics: standard resources, status codes, partial
//! updates and pagination.
//!
//! # Partial updates
//!
//! A Set or Subscribe body with `setPartial: true` is a JSON object applied
//! to the stored value:
//!
//! - keys starting with `/` are JSON Pointers (RFC 6901); the value they
//!   point at is replaced, creating intermediate objects as needed;
//! - every other key is merged with RFC 7396 merge-patch semantics
//!   (`null` deletes, objects merge recursively, anything else replaces).
//!
//! A partial update of a resource that has no stored value is an error and
//! leaves nothing changed.

use serde_json::{Map, Value};

use super::{json, PropertyError};
use crate::domain::device::DeviceInfo;
use crate::domain::property::PropertyMetadata;

/// Names of the standard resources.
pub mod resources {
    pub const RESOURCE_LIST: &str = "ResourceList";
    pub const DEVICE_INFO: &str = "DeviceInfo";
    pub const CHANNEL_LIST: &str = "ChannelList";
    pub const JSON_SCHEMA: &str = "JSONSchema";

    /// `true` for resources every Common Rules responder answers itself.
    pub fn is_builtin(resource: &str) -> bool {
        resource == RESOURCE_LIST || resource == DEVICE_INFO
    }
}

/// Reply status codes.
pub mod status {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const NOT_ALLOWED: u16 = 405;
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    pub const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
    pub const INTERNAL_ERROR: u16 = 500;
}

// ── Partial update ────────────────────────────────────────────────────────────

/// Applies a partial-update body to the stored value of `resource`.
///
/// Returns the new serialized value.
///
/// # Errors
///
/// - [`PropertyError::NoExistingValue`] if `existing` is `None`;
/// - [`PropertyError::Json`] if either side is not JSON;
/// - [`PropertyError::InvalidPartialUpdate`] if the body is not an object or
///   a pointer runs through a scalar.
pub fn apply_partial_update(
    resource: &str,
    existing: Option<&[u8]>,
    patch: &[u8],
) -> Result<Vec<u8>, PropertyError> {
    let existing = existing.ok_or_else(|| PropertyError::NoExistingValue(resource.to_string()))?;
    let mut target = json::parse(existing)?;
    let Value::Object(entries) = json::parse(patch)? else {
        return Err(PropertyError::InvalidPartialUpdate(
            "partial body must be an object".to_string(),
        ));
    };

    for (key, value) in entries {
        if key.starts_with('/') {
            set_pointer(&mut target, &key, value)?;
        } else {
            let mut single = Map::new();
            single.insert(key, value);
            merge_patch(&mut target, &Value::Object(single));
        }
    }
    json::to_bytes(&target)
}

/// RFC 7396 merge-patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_entries) = target {
        for (key, value) in patch_entries {
            if value.is_null() {
                target_entries.remove(key);
            } else {
                merge_patch(
                    target_entries.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Replaces the value at JSON Pointer `pointer`, creating missing objects.
/// `-` as the last array token appends.
fn set_pointer(target: &mut Value, pointer: &str, value: Value) -> Result<(), PropertyError> {
    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = tokens.split_last() else {
        *target = value;
        return Ok(());
    };

    let mut current = target;
    for token in parents {
        current = step_into(current, token, pointer)?;
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let slot = array_index(last, items.len(), pointer)
                .and_then(|i| items.get_mut(i).ok_or_else(|| bad_pointer(pointer)))?;
            *slot = value;
            Ok(())
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert(last.clone(), value);
            *current = Value::Object(map);
            Ok(())
        }
        _ => Err(bad_pointer(pointer)),
    }
}

fn step_into<'a>(
    current: &'a mut Value,
    token: &str,
    pointer: &str,
) -> Result<&'a mut Value, PropertyError> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => Ok(map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = array_index(token, items.len(), pointer)?;
            items.get_mut(index).ok_or_else(|| bad_pointer(pointer))
        }
        _ => Err(bad_pointer(pointer)),
    }
}

fn array_index(token: &str, len: usize, pointer: &str) -> Result<usize, PropertyError> {
    match token.parse::<usize>() {
        Ok(i) if i < len => Ok(i),
        _ => Err(bad_pointer(pointer)),
    }
}

fn bad_pointer(pointer: &str) -> PropertyError {
    PropertyError::InvalidPartialUpdate(format!("cannot apply pointer {pointer}"))
}

// ── Standard resource bodies ──────────────────────────────────────────────────

/// Body of a `ResourceList` reply.
pub fn resource_list_body(metadata: &[PropertyMetadata]) -> Result<Vec<u8>, PropertyError> {
    json::to_bytes(metadata)
}

/// Parses a `ResourceList` body received from a peer.
pub fn parse_resource_list(body: &[u8]) -> Result<Vec<PropertyMetadata>, PropertyError> {
    json::from_bytes(body)
}

/// Body of a `DeviceInfo` reply.
pub fn device_info_body(info: &DeviceInfo) -> Result<Vec<u8>, PropertyError> {
    json::to_bytes(info)
}

/// Parses a `DeviceInfo` body received from a peer.
pub fn parse_device_info(body: &[u8]) -> Result<DeviceInfo, PropertyError> {
    json::from_bytes(body)
}

// ── Pagination ────────────────────────────────────────────────────────────────

/// Returns the `[offset, offset + limit)` slice of a JSON array body, plus
/// the array's total length.
///
/// Bodies that are not arrays are returned unchanged with no total.
pub fn paginate(
    body: &[u8],
    offset: Option<u32>,
    limit: Option<u32>,
) -> Result<(Vec<u8>, Option<u32>), PropertyError> {
    let Value::Array(items) = json::parse(body)? else {
        return Ok((body.to_vec(), None));
    };
    let total = items.len();
    let start = (offset.unwrap_or(0) as usize).min(total);
    let end = match limit {
        Some(limit) => start.saturating_add(limit as usize).min(total),
        None => total,
    };
    let page = Value::Array(items[start..end].to_vec());
    Ok((json::to_bytes(&page)?, u32::try_from(total).ok()))
}

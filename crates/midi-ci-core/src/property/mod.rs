//! Common Rules for Property Exchange: JSON headers and bodies.
//!
//! Property Exchange headers are always JSON.  Bodies are JSON for the
//! standard resources and travel either as 7-bit ASCII or Mcoded7.  Every
//! operation here is pure; the device engine decides what to do with the
//! results.

pub mod common_rules;
pub mod encoding;
pub mod header;
pub mod json;

use thiserror::Error;

pub use common_rules::{apply_partial_update, paginate, resources, status};
pub use encoding::{mcoded7_decode, mcoded7_encode, BodyEncoding};
pub use header::{PropertyHeader, SubscriptionCommand};

/// Errors from the Common Rules property codec.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// A header or body is not valid JSON (or not the expected shape).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body encoding named in `mutualEncoding` is not available.
    #[error("unsupported body encoding: {0}")]
    UnsupportedEncoding(String),

    /// The header has no `resource` key.
    #[error("header does not name a resource")]
    MissingResource,

    /// A partial update arrived for a resource with no stored value.
    #[error("no existing value for {0}; partial update dropped")]
    NoExistingValue(String),

    /// A partial update body is not an object, or a pointer cannot be applied.
    #[error("invalid partial update: {0}")]
    InvalidPartialUpdate(String),

    /// An Mcoded7 stream is malformed.
    #[error("malformed Mcoded7 data: {0}")]
    Mcoded7(String),

    /// An ASCII body contains bytes that are neither 7-bit nor UTF-8.
    #[error("body is not 7-bit ASCII")]
    InvalidAscii,
}

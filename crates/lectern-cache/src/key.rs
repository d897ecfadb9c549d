//! Canonical cache key derivation
//!
//! A key is the SHA-256 of the operation type, the sorted and
//! de-duplicated lecture set, the params serialized with object keys
//! sorted at every level, and the content hash. Fields are joined with
//! a NUL byte, which cannot occur in any of the serialized parts.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

const FIELD_SEPARATOR: u8 = 0;

/// Kind of AI operation whose response is cached
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationType {
    TestGeneration,
    Chat,
    Summary,
    Flashcards,
    Mindmap,
}

impl OperationType {
    /// Parse an operation name as received from a caller
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidInput`] when the name is empty or unknown
    pub fn parse(name: &str) -> Result<Self, CacheError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CacheError::InvalidInput("operationType is required".to_owned()));
        }
        Self::from_str(name).map_err(|_| CacheError::InvalidInput(format!("unknown operationType: {name}")))
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Request shape a cache key is derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyDescriptor {
    pub operation_type: OperationType,
    pub lecture_ids: Vec<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub content_hash: String,
}

impl CacheKeyDescriptor {
    pub fn new(
        operation_type: OperationType,
        lecture_ids: impl IntoIterator<Item = impl Into<String>>,
        params: Map<String, Value>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            operation_type,
            lecture_ids: lecture_ids.into_iter().map(Into::into).collect(),
            params,
            content_hash: content_hash.into(),
        }
    }

    /// Derive the cache key for this descriptor
    ///
    /// # Errors
    ///
    /// See [`derive_key`]
    pub fn cache_key(&self) -> Result<String, CacheError> {
        derive_key(self)
    }
}

/// Derive the canonical cache key: 64 lowercase hex characters
///
/// Lecture order, duplicate lecture ids and params object-key order do
/// not affect the result. Array order inside params does.
///
/// # Errors
///
/// Returns [`CacheError::InvalidInput`] when `lecture_ids` is empty or
/// `content_hash` is blank
pub fn derive_key(descriptor: &CacheKeyDescriptor) -> Result<String, CacheError> {
    if descriptor.lecture_ids.is_empty() {
        return Err(CacheError::InvalidInput("lectureIds must be a non-empty array".to_owned()));
    }
    if descriptor.content_hash.trim().is_empty() {
        return Err(CacheError::InvalidInput("contentHash is required".to_owned()));
    }

    let mut lecture_ids: Vec<&str> = descriptor.lecture_ids.iter().map(String::as_str).collect();
    lecture_ids.sort_unstable();
    lecture_ids.dedup();
    let lectures = Value::Array(lecture_ids.into_iter().map(|id| Value::String(id.to_owned())).collect());

    let mut hasher = Sha256::new();
    hasher.update(descriptor.operation_type.as_str().as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(lectures.to_string().as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(canonical_json(&Value::Object(descriptor.params.clone())).as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(descriptor.content_hash.as_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint lecture material for use as a descriptor's content hash
pub fn content_hash<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Serialize a JSON value with object keys sorted at every nesting level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

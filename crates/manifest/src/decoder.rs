//! Manifest decoding.
//!
//! A manifest is one self-describing document (YAML or JSON) that names its
//! own `apiVersion` and `kind`. Decoding never needs to know which kinds exist:
//! it returns the tag and a [`DynamicObject`] for any well-formed document and
//! leaves "is there a handler for this?" to the caller.

use potato_core::GroupVersionKind;
use serde_json::Value;

use crate::error::{DecodeError, Result};
use crate::object::DynamicObject;

/// A decoded declaration and its type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedManifest {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl DecodedManifest {
    /// Declared object name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.object.name()
    }
}

/// Decode a single manifest document.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] when the bytes are not exactly one
/// mapping document with string `apiVersion` and `kind` fields and a
/// well-formed `metadata` block.
pub fn decode(bytes: &[u8]) -> Result<DecodedManifest> {
    let value: Value = serde_yaml::from_slice(bytes).map_err(|e| DecodeError::malformed(e.to_string()))?;

    let fields = match &value {
        Value::Object(fields) => fields,
        Value::Null => return Err(DecodeError::malformed("empty document")),
        _ => return Err(DecodeError::malformed("document root is not a mapping")),
    };

    let api_version = required_string(fields, "apiVersion")?;
    let kind = required_string(fields, "kind")?;
    let gvk = GroupVersionKind::from_api_version(api_version, kind)
        .map_err(|e| DecodeError::malformed(e.to_string()))?;

    let object: DynamicObject =
        serde_json::from_value(value).map_err(|e| DecodeError::malformed(e.to_string()))?;

    Ok(DecodedManifest { gvk, object })
}

fn required_string<'a>(fields: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str> {
    match fields.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(DecodeError::malformed(format!("field `{field}` is empty"))),
        Some(_) => Err(DecodeError::malformed(format!(
            "field `{field}` is not a string"
        ))),
        None => Err(DecodeError::malformed(format!("missing field `{field}`"))),
    }
}

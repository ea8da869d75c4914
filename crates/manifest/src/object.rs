//! Kind-agnostic object representation.

use potato_core::{GroupVersionKind, NamespacedName, ObjectMeta};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodeError, Result};

/// An object of any kind: typed header and metadata, raw body.
///
/// This is both the decoder's output and the shape the host resource API
/// stores, so objects of kinds nobody registered still round-trip intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Every other top-level field (`spec`, `status`, `data`, ...).
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    /// Create an empty object of the given type.
    #[must_use]
    pub fn new(gvk: &GroupVersionKind, metadata: ObjectMeta) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            metadata,
            data: Map::new(),
        }
    }

    /// Type tag of this object.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] if `apiVersion` cannot be parsed.
    pub fn gvk(&self) -> Result<GroupVersionKind> {
        GroupVersionKind::from_api_version(&self.api_version, self.kind.clone())
            .map_err(|e| DecodeError::malformed(e.to_string()))
    }

    /// Name from metadata, empty when unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name_or_default()
    }

    /// Identity of this object; a missing namespace maps to an empty string.
    #[must_use]
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(
            self.metadata.namespace.clone().unwrap_or_default(),
            self.name().to_string(),
        )
    }

    /// Convert into a typed object.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when the body does not fit `K`.
    pub fn try_into_typed<K: DeserializeOwned>(self) -> Result<K> {
        let value = serde_json::to_value(self).map_err(|e| DecodeError::malformed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| DecodeError::malformed(e.to_string()))
    }

    /// Convert a typed object back into its dynamic form.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when `object` does not serialize to
    /// a mapping with `apiVersion` and `kind`.
    pub fn from_typed<K: Serialize>(object: &K) -> Result<Self> {
        let value =
            serde_json::to_value(object).map_err(|e| DecodeError::malformed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| DecodeError::malformed(e.to_string()))
    }
}

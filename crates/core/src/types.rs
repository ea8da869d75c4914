//! Object model shared by every potato crate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// API group of the `Application` record.
pub const APPLICATION_GROUP: &str = "gitops.potato.io";

/// API version of the `Application` record.
pub const APPLICATION_VERSION: &str = "v1";

/// Kind of the `Application` record.
pub const APPLICATION_KIND: &str = "Application";

/// Annotation carrying the serialized declaration last applied to a resource.
pub const LAST_APPLIED_ANNOTATION: &str = "gitops.potato.io/last-applied-configuration";

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    /// Create a new identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Type tag of a declaration: API group, version and kind.
///
/// The core group is represented by an empty `group`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a tag from its parts.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse an `apiVersion` string (`apps/v1`, `v1`) together with a kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidApiVersion`] when the string is empty, has an
    /// empty segment, or more than one `/`.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        match api_version.split('/').collect::<Vec<_>>().as_slice() {
            [version] if !version.is_empty() => Ok(Self::new("", *version, kind)),
            [group, version] if !group.is_empty() && !version.is_empty() => {
                Ok(Self::new(*group, *version, kind))
            }
            [] | [_] | [_, _] => Err(Error::invalid_api_version(api_version, "empty segment")),
            _ => Err(Error::invalid_api_version(api_version, "too many segments")),
        }
    }

    /// Render the `apiVersion` string for this tag.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Back-reference from a managed object to the object that caused it to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Whether this reference marks its owner as the managing controller.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.controller.unwrap_or(false)
    }
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Name, or an empty string for unnamed objects.
    #[must_use]
    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// The controller owner reference, if any.
    #[must_use]
    pub fn controller_reference(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.is_controller())
    }

    /// Whether any owner reference points at the given uid.
    #[must_use]
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }
}

/// Desired source of an Application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Remote repository URL.
    pub repository: String,
    /// Branch to follow.
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Status reported by the host for an Application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The user-facing record that points at a repository and a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
}

impl Application {
    /// Create an Application record for the given identity.
    pub fn new(
        key: &NamespacedName,
        repository: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: ApplicationSpec {
                repository: repository.into(),
                reference: reference.into(),
            },
            status: None,
        }
    }

    /// Identity of this record. Missing fields map to empty strings.
    #[must_use]
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(
            self.metadata.namespace.clone().unwrap_or_default(),
            self.metadata.name.clone().unwrap_or_default(),
        )
    }

    /// Type tag of the Application record itself.
    #[must_use]
    pub fn gvk() -> GroupVersionKind {
        GroupVersionKind::new(APPLICATION_GROUP, APPLICATION_VERSION, APPLICATION_KIND)
    }

    /// Controller reference pointing at this record.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::gvk().api_version(),
            kind: APPLICATION_KIND.to_string(),
            name: self.metadata.name_or_default().to_string(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

//! Error types for the reconciler crate.

use std::path::PathBuf;
use std::time::Duration;

use potato_core::{GroupVersionKind, NamespacedName};
use potato_manifest::DecodeError;
use potato_source::SyncError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outcome::NextAction;

/// Result type alias for pass-level operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors returned by the host resource and Application APIs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: NamespacedName },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: NamespacedName },

    /// The write was based on a stale version of the object.
    #[error("conflict writing {kind} '{key}': {reason}")]
    Conflict {
        kind: String,
        key: NamespacedName,
        reason: String,
    },

    #[error("host unavailable: {reason}")]
    Unavailable { reason: String },
}

impl HostError {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: &NamespacedName) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.clone(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: &NamespacedName) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.clone(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(
        kind: impl Into<String>,
        key: &NamespacedName,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from stamping ownership onto a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    /// Another owner already controls the resource.
    #[error("'{object}' is already controlled by {controller}")]
    AlreadyControlled { object: String, controller: String },

    /// The owner has no uid, so a reference to it could never be resolved.
    #[error("owner '{owner}' has no uid")]
    OwnerWithoutUid { owner: String },
}

/// Errors from converging a single declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergeError {
    #[error("failed to locate {kind} '{key}': {reason}")]
    LocateFailed {
        kind: String,
        key: NamespacedName,
        reason: String,
    },

    #[error("failed to create {kind} '{key}': {reason}")]
    CreateFailed {
        kind: String,
        key: NamespacedName,
        reason: String,
    },

    #[error("failed to update {kind} '{key}': {reason}")]
    UpdateFailed {
        kind: String,
        key: NamespacedName,
        reason: String,
    },

    /// The declaration decoded but does not fit the kind's schema.
    #[error("invalid {kind} declaration '{name}': {reason}")]
    InvalidDeclaration {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("{kind} '{key}' is owned elsewhere: {reason}")]
    OwnershipConflict {
        kind: String,
        key: NamespacedName,
        reason: String,
    },

    /// The owning Application cannot be referenced.
    #[error("{kind} '{key}' cannot be bound to its owner: {reason}")]
    UnboundOwner {
        kind: String,
        key: NamespacedName,
        reason: String,
    },
}

impl ConvergeError {
    /// Create a locate failed error.
    pub fn locate_failed(
        kind: impl Into<String>,
        key: &NamespacedName,
        reason: impl Into<String>,
    ) -> Self {
        Self::LocateFailed {
            kind: kind.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a create failed error.
    pub fn create_failed(
        kind: impl Into<String>,
        key: &NamespacedName,
        reason: impl Into<String>,
    ) -> Self {
        Self::CreateFailed {
            kind: kind.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create an update failed error.
    pub fn update_failed(
        kind: impl Into<String>,
        key: &NamespacedName,
        reason: impl Into<String>,
    ) -> Self {
        Self::UpdateFailed {
            kind: kind.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create an invalid declaration error.
    pub fn invalid_declaration(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDeclaration {
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an ownership conflict error.
    pub fn ownership_conflict(
        kind: impl Into<String>,
        key: &NamespacedName,
        reason: impl Into<String>,
    ) -> Self {
        Self::OwnershipConflict {
            kind: kind.into(),
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Map a failed [`crate::bind`] of `kind` `key`.
    #[must_use]
    pub fn from_ownership(
        kind: impl Into<String>,
        key: &NamespacedName,
        error: &OwnershipError,
    ) -> Self {
        let reason = error.to_string();
        match error {
            OwnershipError::AlreadyControlled { .. } => Self::ownership_conflict(kind, key, reason),
            OwnershipError::OwnerWithoutUid { .. } => Self::UnboundOwner {
                kind: kind.into(),
                key: key.clone(),
                reason,
            },
        }
    }
}

/// Errors from routing a declaration to an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no adapter registered for {gvk}")]
    UnrecognizedKind { gvk: GroupVersionKind },
}

/// Whether retrying a failed pass as-is can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retrying will not succeed until something outside the pass changes.
    Terminal,
    /// The failure may be transient.
    Retryable,
}

/// Why a pass stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("failed to read application '{application}': {source}")]
    Lookup {
        application: NamespacedName,
        #[source]
        source: HostError,
    },

    #[error("failed to tear down mirror of deleted application '{application}': {source}")]
    Teardown {
        application: NamespacedName,
        #[source]
        source: SyncError,
    },

    #[error("failed to sync source of '{application}': {source}")]
    Sync {
        application: NamespacedName,
        #[source]
        source: SyncError,
    },

    #[error("failed to list manifests in '{path}': {reason}")]
    Discover { path: PathBuf, reason: String },

    #[error("failed to read manifest '{file}': {reason}")]
    Read { file: String, reason: String },

    #[error("manifest '{file}' could not be decoded: {source}")]
    Decode {
        file: String,
        #[source]
        source: DecodeError,
    },

    #[error("manifest '{file}' was not dispatched: {source}")]
    Dispatch {
        file: String,
        #[source]
        source: DispatchError,
    },

    #[error("manifest '{file}' did not converge: {source}")]
    Converge {
        file: String,
        #[source]
        source: ConvergeError,
    },
}

impl ReconcileError {
    /// Classification of this failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Lookup { .. }
            | Self::Teardown { .. }
            | Self::Converge {
                source:
                    ConvergeError::OwnershipConflict { .. } | ConvergeError::UnboundOwner { .. },
                ..
            } => ErrorClass::Terminal,
            Self::Sync { .. }
            | Self::Discover { .. }
            | Self::Read { .. }
            | Self::Decode { .. }
            | Self::Dispatch { .. }
            | Self::Converge { .. } => ErrorClass::Retryable,
        }
    }

    /// Whether the failure is in the declared source rather than in the
    /// machinery applying it. Such passes wait for the source to change.
    #[must_use]
    pub const fn is_source_fault(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::Dispatch { .. }
                | Self::Converge {
                    source: ConvergeError::InvalidDeclaration { .. },
                    ..
                }
        )
    }

    /// What the host should do after a pass that failed this way.
    #[must_use]
    pub const fn next_action(&self, requeue_interval: Duration) -> NextAction {
        if self.is_source_fault() {
            NextAction::RequeueAfter(requeue_interval)
        } else {
            NextAction::Backoff
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects
    )]

    use super::*;

    fn key() -> NamespacedName {
        NamespacedName::new("default", "demo")
    }

    #[test]
    fn malformed_manifest_waits_for_the_source() {
        let err = ReconcileError::Decode {
            file: "03.yaml".into(),
            source: DecodeError::malformed("bad"),
        };
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(
            err.next_action(Duration::from_secs(10)),
            NextAction::RequeueAfter(Duration::from_secs(10))
        );
    }

    #[test]
    fn failed_create_backs_off() {
        let err = ReconcileError::Converge {
            file: "web.yaml".into(),
            source: ConvergeError::create_failed("Deployment", &key(), "down"),
        };
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(err.next_action(Duration::from_secs(10)), NextAction::Backoff);
    }

    #[test]
    fn teardown_failure_is_terminal_but_retried() {
        let err = ReconcileError::Teardown {
            application: key(),
            source: SyncError::teardown_failed("/m", "busy"),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.next_action(Duration::from_secs(10)), NextAction::Backoff);
    }

    #[test]
    fn ownership_conflict_is_terminal() {
        let err = ReconcileError::Converge {
            file: "web.yaml".into(),
            source: ConvergeError::ownership_conflict("Deployment", &key(), "other"),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
    }

    #[test]
    fn uid_less_owner_is_terminal() {
        let ownership = OwnershipError::OwnerWithoutUid {
            owner: "default/demo".into(),
        };
        let source = ConvergeError::from_ownership("Deployment", &key(), &ownership);
        assert!(matches!(source, ConvergeError::UnboundOwner { .. }));

        let err = ReconcileError::Converge {
            file: "web.yaml".into(),
            source,
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.next_action(Duration::from_secs(10)), NextAction::Backoff);
    }

    #[test]
    fn host_error_display_names_object() {
        let err = HostError::not_found("Deployment", &key());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("default/demo"));
    }
}

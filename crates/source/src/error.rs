//! Error types for source synchronization.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Source synchronization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No mirror existed and the clone did not succeed.
    #[error("failed to clone '{repository}' at '{reference}': {reason}")]
    CloneFailed {
        repository: String,
        reference: String,
        reason: String,
    },

    /// An existing mirror could not be brought up to date.
    #[error("failed to pull '{reference}' into '{path}': {reason}")]
    PullFailed {
        path: PathBuf,
        reference: String,
        reason: String,
    },

    /// The mirror path exists but cannot be used.
    #[error("mirror at '{path}' is unreadable: {reason}")]
    MirrorUnreadable { path: PathBuf, reason: String },

    /// Removing a mirror failed.
    #[error("failed to remove mirror at '{path}': {reason}")]
    TeardownFailed { path: PathBuf, reason: String },

    /// The requested ref is not a usable branch name.
    #[error("invalid ref '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The git executable could not be started.
    #[error("git is unavailable: {reason}")]
    GitUnavailable { reason: String },
}

impl SyncError {
    /// Create a clone failed error.
    pub fn clone_failed(
        repository: impl Into<String>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CloneFailed {
            repository: repository.into(),
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a pull failed error.
    pub fn pull_failed(
        path: impl Into<PathBuf>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PullFailed {
            path: path.into(),
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a mirror unreadable error.
    pub fn mirror_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MirrorUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a teardown failed error.
    pub fn teardown_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TeardownFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid reference error.
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a git unavailable error.
    pub fn git_unavailable(reason: impl Into<String>) -> Self {
        Self::GitUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the pass must stop. A failed pull on a readable mirror does not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::PullFailed { .. })
    }
}

//! Error types for manifest decoding.

use thiserror::Error;

/// Result type alias for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// A document could not be read as a declaration at all.
///
/// A well-formed document of an unknown kind is *not* a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes are not a single structured document with a type tag.
    #[error("malformed manifest: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    /// Create a malformed-document error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Malformed { reason } => reason,
        }
    }
}

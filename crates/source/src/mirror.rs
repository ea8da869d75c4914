//! Mirror layout: where the local copy of an Application's repository lives.
//!
//! The path is a pure function of the Application identity, so every pass for
//! the same Application finds the same mirror and no two Applications share
//! one, across process restarts.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use potato_core::NamespacedName;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Derives and removes mirror directories under a fixed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorLayout {
    root: PathBuf,
}

impl MirrorLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root under which all mirrors live.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mirror path for an identity: `<root>/<namespace>/<name>`, each
    /// component encoded with [`encode_component`].
    #[must_use]
    pub fn mirror_path(&self, key: &NamespacedName) -> PathBuf {
        self.root
            .join(encode_component(&key.namespace))
            .join(encode_component(&key.name))
    }

    /// Delete the mirror for `key`. A mirror that does not exist counts as
    /// removed.
    ///
    /// Returns whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TeardownFailed`] if the directory exists but
    /// cannot be removed.
    pub async fn remove(&self, key: &NamespacedName) -> Result<bool> {
        let path = self.mirror_path(key);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(application = %key, path = %path.display(), "Removed mirror");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(application = %key, path = %path.display(), "No mirror to remove");
                Ok(false)
            }
            Err(e) => Err(SyncError::teardown_failed(&path, e.to_string())),
        }
    }
}

/// Encode one identity component as a single, safe path segment.
///
/// Bytes outside `[A-Za-z0-9._-]` and a leading `.` become `%XX`; the empty
/// string becomes `%`. The mapping is injective, never yields `.`/`..` or a
/// hidden name, and never contains a separator.
#[must_use]
pub fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.');
        if plain && !(i == 0 && byte == b'.') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

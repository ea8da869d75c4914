//! Controller configuration.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by the source sync, the adapters and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Namespace every managed resource is created in.
    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,

    /// Root directory under which mirrors are derived.
    #[serde(default = "default_mirror_root")]
    pub mirror_root: PathBuf,

    /// Manifest subdirectory inside a mirror.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: String,

    /// Remote used when pulling an existing mirror.
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Delay before the next pass after a fully successful one.
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,

    /// Upper bound for a single git invocation.
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,

    /// First backoff delay after a failed pass.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Backoff ceiling.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// How often the controller loop lists Applications.
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,
}

fn default_target_namespace() -> String {
    "default".to_string()
}

fn default_mirror_root() -> PathBuf {
    std::env::temp_dir().join("potato-mirrors")
}

fn default_manifest_dir() -> String {
    "kubernetes".to_string()
}

fn default_remote_name() -> String {
    "origin".to_string()
}

const fn default_requeue_interval() -> u64 {
    10
}

const fn default_git_timeout() -> u64 {
    120
}

const fn default_error_backoff() -> u64 {
    5
}

const fn default_max_backoff() -> u64 {
    300
}

const fn default_rescan_interval() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_namespace: default_target_namespace(),
            mirror_root: default_mirror_root(),
            manifest_dir: default_manifest_dir(),
            remote_name: default_remote_name(),
            requeue_interval_secs: default_requeue_interval(),
            git_timeout_secs: default_git_timeout(),
            error_backoff_secs: default_error_backoff(),
            max_backoff_secs: default_max_backoff(),
            rescan_interval_secs: default_rescan_interval(),
        }
    }
}

impl ControllerConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML config file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid TOML, or fails
    /// [`ControllerConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::toml_parse_failed(path, e.to_string()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded controller config");
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if a name is empty, the manifest directory escapes the
    /// mirror, or an interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.target_namespace.trim().is_empty() {
            return Err(Error::invalid_config("target_namespace must not be empty"));
        }

        if self.remote_name.trim().is_empty() {
            return Err(Error::invalid_config("remote_name must not be empty"));
        }

        let manifest_dir = Path::new(&self.manifest_dir);
        if self.manifest_dir.is_empty() || manifest_dir.is_absolute() {
            return Err(Error::invalid_config(
                "manifest_dir must be a non-empty relative path",
            ));
        }
        if manifest_dir
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::invalid_config("manifest_dir must not contain '..'"));
        }

        let intervals = [
            ("requeue_interval_secs", self.requeue_interval_secs),
            ("git_timeout_secs", self.git_timeout_secs),
            ("error_backoff_secs", self.error_backoff_secs),
            ("max_backoff_secs", self.max_backoff_secs),
            ("rescan_interval_secs", self.rescan_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!(
                "{name} must be greater than 0"
            )));
        }

        if self.max_backoff_secs < self.error_backoff_secs {
            return Err(Error::invalid_config(
                "max_backoff_secs must not be lower than error_backoff_secs",
            ));
        }

        Ok(())
    }

    /// Delay before the next pass after a fully successful one.
    #[must_use]
    pub const fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    /// Upper bound for a single git invocation.
    #[must_use]
    pub const fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    /// First backoff delay after a failed pass.
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Backoff ceiling.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Interval between Application listings in the controller loop.
    #[must_use]
    pub const fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }
}

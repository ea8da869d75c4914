//! Keeping a local mirror of an Application's repository current.

use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use potato_core::{ControllerConfig, NamespacedName};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::git::{Git, GitFailure};
use crate::mirror::MirrorLayout;

/// Mirror-local git config keys recording what a mirror was cloned from.
const REPOSITORY_KEY: &str = "potato.repository";
const REFERENCE_KEY: &str = "potato.ref";

/// How a mirror got to its current state during one `ensure` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No mirror existed; it was cloned.
    Cloned,
    /// The mirror moved forward to the remote ref.
    FastForwarded,
    /// The mirror already matched the remote ref.
    UpToDate,
    /// The pull failed but the existing mirror is still readable.
    Stale { reason: String },
}

/// Result of bringing a mirror up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Root of the mirror.
    pub path: PathBuf,
    /// Directory inside the mirror that holds the manifests.
    pub manifest_dir: PathBuf,
    /// Commit checked out in the mirror, when it can be resolved.
    pub revision: Option<String>,
    pub status: SyncStatus,
}

/// Maintains one local mirror per Application.
#[async_trait]
pub trait SourceSync: Send + Sync {
    /// Where the mirror for `key` lives. Pure and deterministic.
    fn mirror_path(&self, key: &NamespacedName) -> PathBuf;

    /// Make sure a mirror of `repository` at `reference` exists for `key` and
    /// is as current as possible.
    ///
    /// A failed pull on a readable mirror is reported as
    /// [`SyncStatus::Stale`], not as an error.
    async fn ensure(
        &self,
        key: &NamespacedName,
        repository: &str,
        reference: &str,
    ) -> Result<SyncReport>;

    /// Remove the mirror for `key`. Removing a mirror that does not exist
    /// succeeds. Returns whether anything was deleted.
    async fn teardown(&self, key: &NamespacedName) -> Result<bool>;
}

/// [`SourceSync`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitSourceSync {
    layout: MirrorLayout,
    git: Git,
    remote: String,
    manifest_dir: PathBuf,
}

impl GitSourceSync {
    /// Build from controller configuration, using `git` from `PATH`.
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            layout: MirrorLayout::new(&config.mirror_root),
            git: Git::new(config.git_timeout()),
            remote: config.remote_name.clone(),
            manifest_dir: PathBuf::from(&config.manifest_dir),
        }
    }

    /// Use a specific git executable.
    #[must_use]
    pub fn with_git_program(mut self, program: impl Into<OsString>, timeout: Duration) -> Self {
        self.git = Git::with_program(program, timeout);
        self
    }

    /// Mirror layout in use.
    #[must_use]
    pub fn layout(&self) -> &MirrorLayout {
        &self.layout
    }

    fn report(&self, path: PathBuf, revision: Option<String>, status: SyncStatus) -> SyncReport {
        SyncReport {
            manifest_dir: path.join(&self.manifest_dir),
            path,
            revision,
            status,
        }
    }

    async fn clone_into(
        &self,
        key: &NamespacedName,
        path: &Path,
        repository: &str,
        reference: &str,
    ) -> Result<SyncReport> {
        let parent = path.parent().unwrap_or_else(|| self.layout.root());
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::clone_failed(repository, reference, e.to_string()))?;

        // Staging names start with '.', which encoded components never do.
        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)
            .map_err(|e| SyncError::clone_failed(repository, reference, e.to_string()))?;
        let checkout = staging.path().join("checkout");

        info!(
            application = %key,
            repository = %repository,
            reference = %reference,
            "Cloning repository"
        );

        self.git
            .run(
                None,
                [
                    OsStr::new("clone"),
                    OsStr::new("--branch"),
                    OsStr::new(reference),
                    OsStr::new("--single-branch"),
                    OsStr::new("--origin"),
                    OsStr::new(&self.remote),
                    OsStr::new("--"),
                    OsStr::new(repository),
                    checkout.as_os_str(),
                ],
            )
            .await
            .map_err(|failure| match failure {
                GitFailure::Unavailable(reason) => SyncError::git_unavailable(reason),
                other => SyncError::clone_failed(repository, reference, other.to_string()),
            })?;
        self.record_source(&checkout, repository, reference)
            .await
            .map_err(|failure| SyncError::clone_failed(repository, reference, failure.to_string()))?;

        swap_in(&checkout, path, staging.path())
            .await
            .map_err(|e| SyncError::clone_failed(repository, reference, e.to_string()))?;

        let revision = self.git.head_revision(path).await;
        info!(
            application = %key,
            path = %path.display(),
            revision = revision.as_deref().unwrap_or("unknown"),
            "Cloned mirror"
        );
        Ok(self.report(path.to_path_buf(), revision, SyncStatus::Cloned))
    }

    async fn pull(&self, key: &NamespacedName, path: &Path, reference: &str) -> Result<SyncReport> {
        let before = self.git.head_revision(path).await;

        match self.fast_forward(path, reference).await {
            Ok(()) => {
                let after = self.git.head_revision(path).await;
                let status = if before == after {
                    SyncStatus::UpToDate
                } else {
                    SyncStatus::FastForwarded
                };
                debug!(
                    application = %key,
                    revision = after.as_deref().unwrap_or("unknown"),
                    status = ?status,
                    "Pulled mirror"
                );
                Ok(self.report(path.to_path_buf(), after, status))
            }
            Err(GitFailure::Unavailable(reason)) => Err(SyncError::git_unavailable(reason)),
            Err(failure) => {
                let error = SyncError::pull_failed(path, reference, failure.to_string());
                if let Err(e) = tokio::fs::read_dir(path).await {
                    return Err(SyncError::mirror_unreadable(path, e.to_string()));
                }
                warn!(
                    application = %key,
                    error = %error,
                    "Pull failed, continuing with existing mirror"
                );
                Ok(self.report(
                    path.to_path_buf(),
                    before,
                    SyncStatus::Stale {
                        reason: error.to_string(),
                    },
                ))
            }
        }
    }

    async fn fast_forward(
        &self,
        path: &Path,
        reference: &str,
    ) -> std::result::Result<(), GitFailure> {
        self.git
            .run(
                Some(path),
                ["fetch", "--end-of-options", self.remote.as_str(), reference],
            )
            .await?;
        self.git
            .run(Some(path), ["merge", "--ff-only", "FETCH_HEAD"])
            .await?;
        Ok(())
    }

    async fn record_source(
        &self,
        repo: &Path,
        repository: &str,
        reference: &str,
    ) -> std::result::Result<(), GitFailure> {
        for (key, value) in [(REPOSITORY_KEY, repository), (REFERENCE_KEY, reference)] {
            self.git
                .run(
                    Some(repo),
                    ["config", "--local", "--end-of-options", key, value],
                )
                .await?;
        }
        Ok(())
    }

    /// Repository and ref the mirror at `repo` was cloned from, if recorded.
    async fn recorded_source(&self, repo: &Path) -> Option<(String, String)> {
        let repository = self
            .git
            .run(Some(repo), ["config", "--local", "--get", REPOSITORY_KEY])
            .await
            .ok()?;
        let reference = self
            .git
            .run(Some(repo), ["config", "--local", "--get", REFERENCE_KEY])
            .await
            .ok()?;
        Some((repository, reference))
    }

    /// Reject refs git could read as an option or that are not valid branch
    /// names.
    async fn check_reference(&self, reference: &str) -> Result<()> {
        if reference.is_empty() {
            return Err(SyncError::invalid_reference(reference, "ref is empty"));
        }
        if reference.starts_with('-') {
            return Err(SyncError::invalid_reference(reference, "ref starts with '-'"));
        }

        match self
            .git
            .run(None, ["check-ref-format", "--branch", reference])
            .await
        {
            Ok(_) => Ok(()),
            Err(GitFailure::Unavailable(reason)) => Err(SyncError::git_unavailable(reason)),
            Err(failure) => Err(SyncError::invalid_reference(reference, failure.to_string())),
        }
    }
}

/// Move a finished checkout to `path`. A mirror already at `path` is
/// moved into `staging` first and put back if the swap fails.
async fn swap_in(checkout: &Path, path: &Path, staging: &Path) -> std::io::Result<()> {
    let previous = staging.join("previous");
    let replaced = match tokio::fs::rename(path, &previous).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    if let Err(e) = tokio::fs::rename(checkout, path).await {
        if replaced {
            if let Err(restore) = tokio::fs::rename(&previous, path).await {
                warn!(path = %path.display(), error = %restore, "Failed to restore previous mirror");
            }
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl SourceSync for GitSourceSync {
    fn mirror_path(&self, key: &NamespacedName) -> PathBuf {
        self.layout.mirror_path(key)
    }

    async fn ensure(
        &self,
        key: &NamespacedName,
        repository: &str,
        reference: &str,
    ) -> Result<SyncReport> {
        self.check_reference(reference).await?;

        let path = self.layout.mirror_path(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                let recorded = self.recorded_source(&path).await;
                let same_source = recorded.as_ref().is_some_and(|(cloned_from, cloned_ref)| {
                    cloned_from == repository && cloned_ref == reference
                });
                if same_source {
                    self.pull(key, &path, reference).await
                } else {
                    info!(
                        application = %key,
                        previous = ?recorded,
                        repository = %repository,
                        reference = %reference,
                        "Source changed, replacing mirror"
                    );
                    self.clone_into(key, &path, repository, reference).await
                }
            }
            Ok(_) => Err(SyncError::mirror_unreadable(&path, "not a directory")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.clone_into(key, &path, repository, reference).await
            }
            Err(e) => Err(SyncError::mirror_unreadable(&path, e.to_string())),
        }
    }

    async fn teardown(&self, key: &NamespacedName) -> Result<bool> {
        self.layout.remove(key).await
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

    fn sync_rooted_at(root: &Path) -> GitSourceSync {
        let config = ControllerConfig {
            mirror_root: root.to_path_buf(),
            ..ControllerConfig::default()
        };
        GitSourceSync::new(&config)
    }

    #[tokio::test]
    async fn file_at_mirror_path_is_unreadable() {
        let root = tempfile::tempdir().unwrap();
        let sync = sync_rooted_at(root.path());
        let key = NamespacedName::new("default", "demo");
        let path = sync.mirror_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not a repo").unwrap();

        let err = sync.ensure(&key, "unused", "main").await.unwrap_err();
        assert!(matches!(err, SyncError::MirrorUnreadable { .. }));
    }

    #[tokio::test]
    async fn failed_clone_leaves_no_mirror() {
        let root = tempfile::tempdir().unwrap();
        let sync = sync_rooted_at(root.path());
        let key = NamespacedName::new("default", "demo");
        let missing = root.path().join("no-such-repo");

        let err = sync
            .ensure(&key, missing.to_str().unwrap(), "main")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CloneFailed { .. }));
        assert!(!sync.mirror_path(&key).exists());

        let leftovers: Vec<_> = std::fs::read_dir(sync.mirror_path(&key).parent().unwrap())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_git_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let sync = sync_rooted_at(root.path())
            .with_git_program("potato-no-such-git-binary", Duration::from_secs(5));
        let key = NamespacedName::new("default", "demo");

        let err = sync.ensure(&key, "unused", "main").await.unwrap_err();
        assert!(matches!(err, SyncError::GitUnavailable { .. }));
    }

    #[test]
    fn manifest_dir_is_inside_mirror() {
        let root = tempfile::tempdir().unwrap();
        let sync = sync_rooted_at(root.path());
        let report = sync.report(root.path().join("m"), None, SyncStatus::Cloned);
        assert_eq!(report.manifest_dir, root.path().join("m").join("kubernetes"));
    }
}

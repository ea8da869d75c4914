//! One reconciliation pass for one Application.
//!
//! A pass runs resolve, sync, discover, then decode and dispatch for every
//! manifest file in order. The first failure stops the pass; files after it
//! are not read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use itertools::Itertools;
use potato_core::{Application, ControllerConfig, NamespacedName};
use potato_manifest::decode;
use potato_source::{PassLocks, SourceSync, SyncStatus};
use tracing::{debug, error, info, warn};

use crate::adapter::AdapterRegistry;
use crate::error::{ReconcileError, Result};
use crate::host::ApplicationApi;
use crate::outcome::{ManifestReport, ManifestStatus, NextAction, PassStatus, ReconcileOutcome};

/// Drives reconciliation passes.
pub struct ApplicationReconciler {
    applications: Arc<dyn ApplicationApi>,
    source: Arc<dyn SourceSync>,
    adapters: AdapterRegistry,
    locks: PassLocks,
    requeue_interval: Duration,
}

impl std::fmt::Debug for ApplicationReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationReconciler")
            .field("adapters", &self.adapters)
            .field("requeue_interval", &self.requeue_interval)
            .finish_non_exhaustive()
    }
}

/// Working state of a pass, kept so partial progress survives an abort.
#[derive(Debug, Default)]
struct PassProgress {
    revision: Option<String>,
    manifests: Vec<ManifestReport>,
}

impl ApplicationReconciler {
    /// Create a reconciler.
    pub fn new(
        applications: Arc<dyn ApplicationApi>,
        source: Arc<dyn SourceSync>,
        adapters: AdapterRegistry,
        requeue_interval: Duration,
    ) -> Self {
        Self {
            applications,
            source,
            adapters,
            locks: PassLocks::new(),
            requeue_interval,
        }
    }

    /// Start building a reconciler.
    #[must_use]
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    /// Delay requested after a fully successful pass.
    #[must_use]
    pub const fn requeue_interval(&self) -> Duration {
        self.requeue_interval
    }

    /// Run one pass for `key`.
    ///
    /// Passes for the same Application are serialized; passes for different
    /// Applications run concurrently. The returned outcome always carries the
    /// action the host should take next.
    pub async fn reconcile(&self, key: &NamespacedName) -> ReconcileOutcome {
        let started_at = Utc::now();
        let guard = self.locks.acquire(key).await;

        info!(application = %key, "Starting reconciliation");
        let mut progress = PassProgress::default();
        let result = self.run_pass(key, &mut progress).await;
        drop(guard);

        let (status, next_action) = match result {
            Ok(PassStatus::Deleted) => {
                self.locks.forget(key).await;
                (PassStatus::Deleted, NextAction::Done)
            }
            Ok(status) => (status, NextAction::RequeueAfter(self.requeue_interval)),
            Err(e) => {
                let next_action = e.next_action(self.requeue_interval);
                error!(
                    application = %key,
                    error = %e,
                    class = ?e.class(),
                    next = ?next_action,
                    "Reconciliation aborted"
                );
                (PassStatus::Aborted { error: e }, next_action)
            }
        };

        info!(
            application = %key,
            manifests = progress.manifests.len(),
            next = ?next_action,
            "Reconciliation finished"
        );

        ReconcileOutcome {
            application: key.clone(),
            revision: progress.revision,
            manifests: progress.manifests,
            status,
            next_action,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_pass(
        &self,
        key: &NamespacedName,
        progress: &mut PassProgress,
    ) -> Result<PassStatus> {
        let Some(application) = self.resolve(key).await? else {
            return Ok(PassStatus::Deleted);
        };

        let report = self
            .source
            .ensure(key, &application.spec.repository, &application.spec.reference)
            .await
            .map_err(|source| ReconcileError::Sync {
                application: key.clone(),
                source,
            })?;
        progress.revision.clone_from(&report.revision);
        if let SyncStatus::Stale { reason } = &report.status {
            warn!(application = %key, reason = %reason, "Reconciling against a stale mirror");
        }

        let files = discover(&report.manifest_dir).await?;
        debug!(application = %key, count = files.len(), "Discovered manifests");

        for path in files {
            let report = self.apply_file(&application, &path).await;
            match report {
                Ok(report) => progress.manifests.push(report),
                Err((report, e)) => {
                    progress.manifests.push(report);
                    return Err(e);
                }
            }
        }

        info!(
            application = %key,
            revision = progress.revision.as_deref().unwrap_or("unknown"),
            "Application converged"
        );
        Ok(PassStatus::Converged)
    }

    /// Fetch the Application, or tear down its mirror if it is gone.
    async fn resolve(&self, key: &NamespacedName) -> Result<Option<Application>> {
        match self.applications.get_application(key).await {
            Ok(application) => Ok(Some(application)),
            Err(e) if e.is_not_found() => {
                info!(application = %key, "Application deleted, removing mirror");
                self.source
                    .teardown(key)
                    .await
                    .map_err(|source| ReconcileError::Teardown {
                        application: key.clone(),
                        source,
                    })?;
                Ok(None)
            }
            Err(source) => Err(ReconcileError::Lookup {
                application: key.clone(),
                source,
            }),
        }
    }

    /// Decode one file and converge it. On failure, returns the failed report
    /// together with the error that aborts the pass.
    async fn apply_file(
        &self,
        owner: &Application,
        path: &Path,
    ) -> std::result::Result<ManifestReport, (ManifestReport, ReconcileError)> {
        let file = file_name(path);
        let mut report = ManifestReport {
            file: file.clone(),
            gvk: None,
            name: None,
            status: ManifestStatus::Unchanged,
        };
        let fail = |mut report: ManifestReport, e: ReconcileError| {
            report.status = ManifestStatus::Failed {
                reason: e.to_string(),
            };
            (report, e)
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = e.to_string();
                return Err(fail(report, ReconcileError::Read { file, reason }));
            }
        };

        let manifest = match decode(&bytes) {
            Ok(manifest) => manifest,
            Err(source) => return Err(fail(report, ReconcileError::Decode { file, source })),
        };
        report.gvk = Some(manifest.gvk.clone());
        report.name = Some(manifest.name().to_string());
        debug!(file = %file, kind = %manifest.gvk, name = %manifest.name(), "Decoded manifest");

        let adapter = match self.adapters.resolve(&manifest.gvk) {
            Ok(adapter) => adapter,
            Err(source) => return Err(fail(report, ReconcileError::Dispatch { file, source })),
        };

        match adapter.converge(manifest.object, owner).await {
            Ok(outcome) => {
                report.status = ManifestStatus::from(&outcome);
                Ok(report)
            }
            Err(source) => Err(fail(report, ReconcileError::Converge { file, source })),
        }
    }
}

/// Regular files directly inside `dir`, sorted by file name.
async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let unreadable = |e: std::io::Error| ReconcileError::Discover {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                debug!(file = %path.display(), "Found manifest");
                files.push(path);
            }
            Ok(_) => debug!(path = %path.display(), "Skipping non-file entry"),
            Err(e) => return Err(unreadable(e)),
        }
    }

    Ok(files
        .into_iter()
        .sorted_by(|a, b| a.file_name().cmp(&b.file_name()))
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Builder for [`ApplicationReconciler`].
#[derive(Default)]
pub struct ReconcilerBuilder {
    applications: Option<Arc<dyn ApplicationApi>>,
    source: Option<Arc<dyn SourceSync>>,
    adapters: AdapterRegistry,
    requeue_interval: Option<Duration>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set where Application records are read from.
    #[must_use]
    pub fn with_applications(mut self, applications: Arc<dyn ApplicationApi>) -> Self {
        self.applications = Some(applications);
        self
    }

    /// Set the source synchronizer.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SourceSync>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the adapter registry.
    #[must_use]
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Take the requeue interval from controller configuration.
    #[must_use]
    pub fn with_config(mut self, config: &ControllerConfig) -> Self {
        self.requeue_interval = Some(config.requeue_interval());
        self
    }

    /// Set the delay requested after a fully successful pass.
    #[must_use]
    pub fn requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = Some(interval);
        self
    }

    /// Build the reconciler. Returns `None` if the Application API or the
    /// source synchronizer is missing.
    #[must_use]
    pub fn build(self) -> Option<ApplicationReconciler> {
        let requeue_interval = self
            .requeue_interval
            .unwrap_or_else(|| ControllerConfig::default().requeue_interval());
        Some(ApplicationReconciler::new(
            self.applications?,
            self.source?,
            self.adapters,
            requeue_interval,
        ))
    }
}

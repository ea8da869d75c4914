//! What a reconciliation pass produced.

use std::time::Duration;

use chrono::{DateTime, Utc};
use potato_core::{GroupVersionKind, NamespacedName};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, ReconcileError};

/// Result of converging one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// The resource did not exist and was created.
    Created,
    /// Managed fields differed; the listed fields were rewritten.
    Updated { changed: Vec<String> },
    /// Live state already matched the declaration. No write was issued.
    Unchanged,
}

/// Per-manifest status within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManifestStatus {
    Created,
    Updated,
    Unchanged,
    Failed { reason: String },
}

impl From<&ConvergeOutcome> for ManifestStatus {
    fn from(outcome: &ConvergeOutcome) -> Self {
        match outcome {
            ConvergeOutcome::Created => Self::Created,
            ConvergeOutcome::Updated { .. } => Self::Updated,
            ConvergeOutcome::Unchanged => Self::Unchanged,
        }
    }
}

/// One manifest file seen during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestReport {
    /// File name inside the manifest directory.
    pub file: String,
    /// Type tag, when the file decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gvk: Option<GroupVersionKind>,
    /// Declared object name, when the file decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub status: ManifestStatus,
}

/// What the host should do once a pass returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Nothing left to do for this Application.
    Done,
    /// Run another pass after a fixed delay.
    RequeueAfter(Duration),
    /// Retry using the host's backoff policy.
    Backoff,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    /// Every manifest converged.
    Converged,
    /// The Application no longer exists and its mirror was removed.
    Deleted,
    /// The pass stopped at the first failure.
    Aborted { error: ReconcileError },
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub application: NamespacedName,
    /// Commit the pass worked from, when known.
    pub revision: Option<String>,
    /// Manifests in the order they were processed. Files after an abort are
    /// not listed.
    pub manifests: Vec<ManifestReport>,
    pub status: PassStatus,
    pub next_action: NextAction,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.status, PassStatus::Aborted { .. })
    }

    /// The error that stopped the pass, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&ReconcileError> {
        match &self.status {
            PassStatus::Aborted { error } => Some(error),
            PassStatus::Converged | PassStatus::Deleted => None,
        }
    }

    /// Classification of the failure, if the pass failed.
    #[must_use]
    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error().map(ReconcileError::class)
    }

    /// Number of manifests with the given status.
    #[must_use]
    pub fn count(&self, status: &ManifestStatus) -> usize {
        self.manifests.iter().filter(|m| &m.status == status).count()
    }

    /// Whether any manifest was created or updated.
    #[must_use]
    pub fn wrote_anything(&self) -> bool {
        self.manifests
            .iter()
            .any(|m| matches!(m.status, ManifestStatus::Created | ManifestStatus::Updated))
    }
}

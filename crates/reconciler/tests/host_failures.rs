//! Passes against a host that fails reads and writes.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod common;

use std::sync::Arc;

use common::{
    DirectorySource, Fault, FaultyHost, TARGET_NAMESPACE, demo_key, deployment, reconciler,
    reconciler_with_host, register_demo,
};
use potato_core::{GroupVersionKind, NamespacedName};
use potato_reconciler::{
    ConvergeError, ErrorClass, InMemoryCluster, ManifestStatus, NextAction, ReconcileError,
};
use serde_json::json;

fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::new("apps", "v1", "Deployment")
}

fn target(name: &str) -> NamespacedName {
    NamespacedName::new(TARGET_NAMESPACE, name)
}

/// Three Deployments; the middle one is the one the host fails on.
fn three_deployments() -> Arc<DirectorySource> {
    let source = Arc::new(DirectorySource::new());
    source.write("01-a.yaml", &deployment("a", 1));
    source.write("02-web.yaml", &deployment("web", 2));
    source.write("03-z.yaml", &deployment("z", 3));
    source
}

fn converge_error(outcome: &potato_reconciler::ReconcileOutcome) -> &ConvergeError {
    match outcome.error() {
        Some(ReconcileError::Converge { file, source }) => {
            assert_eq!(file, "02-web.yaml");
            source
        }
        other => panic!("expected a converge failure, got {other:?}"),
    }
}

/// Given a host that cannot read the second object
/// When a pass runs
/// Then the pass stops there with a retryable error and the third file is
/// never applied
#[tokio::test]
async fn failed_read_aborts_and_backs_off() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = three_deployments();
    register_demo(&cluster, "https://example/repo").await;
    let host = Arc::new(FaultyHost::new(cluster.clone(), "web", Fault::Get));

    let outcome = reconciler_with_host(&cluster, host, source)
        .reconcile(&demo_key())
        .await;

    assert!(matches!(
        converge_error(&outcome),
        ConvergeError::LocateFailed { .. }
    ));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Retryable));
    assert_eq!(outcome.next_action, NextAction::Backoff);
    assert_eq!(outcome.manifests.len(), 2);
    assert_eq!(outcome.manifests[0].status, ManifestStatus::Created);
    assert!(matches!(
        outcome.manifests[1].status,
        ManifestStatus::Failed { .. }
    ));
    assert!(cluster.peek(&deployment_gvk(), &target("a")).await.is_some());
    assert!(cluster.peek(&deployment_gvk(), &target("z")).await.is_none());
}

#[tokio::test]
async fn failed_create_aborts_and_backs_off() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = three_deployments();
    register_demo(&cluster, "https://example/repo").await;
    let host = Arc::new(FaultyHost::new(cluster.clone(), "web", Fault::Create));

    let outcome = reconciler_with_host(&cluster, host, source)
        .reconcile(&demo_key())
        .await;

    assert!(matches!(
        converge_error(&outcome),
        ConvergeError::CreateFailed { .. }
    ));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Retryable));
    assert_eq!(outcome.next_action, NextAction::Backoff);
    assert!(cluster.peek(&deployment_gvk(), &target("web")).await.is_none());
    assert!(cluster.peek(&deployment_gvk(), &target("z")).await.is_none());
}

/// Given drifted objects and another writer touching the second one between
/// read and write
/// When a pass runs
/// Then the stale update fails, the pass backs off and the third object keeps
/// its drift until the next pass
#[tokio::test]
async fn conflicting_update_aborts_and_backs_off() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = three_deployments();
    register_demo(&cluster, "https://example/repo").await;
    reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    for name in ["web", "z"] {
        cluster
            .edit(&deployment_gvk(), &target(name), |o| {
                o.data["spec"]["replicas"] = json!(9);
            })
            .await;
    }

    let host = Arc::new(FaultyHost::new(cluster.clone(), "web", Fault::EditAfterGet));
    let outcome = reconciler_with_host(&cluster, host, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(
        converge_error(&outcome),
        ConvergeError::UpdateFailed { .. }
    ));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Retryable));
    assert_eq!(outcome.next_action, NextAction::Backoff);
    assert_eq!(outcome.manifests[0].status, ManifestStatus::Unchanged);

    let z = cluster.peek(&deployment_gvk(), &target("z")).await.unwrap();
    assert_eq!(z.data["spec"]["replicas"], 9);

    let retry = reconciler(&cluster, source).reconcile(&demo_key()).await;
    assert!(retry.is_success());
    assert_eq!(retry.count(&ManifestStatus::Updated), 2);
}

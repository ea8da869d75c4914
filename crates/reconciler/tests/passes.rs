//! Pass-level behaviour of the reconciler against the in-memory host.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{
    DirectorySource, REQUEUE, TARGET_NAMESPACE, demo_key, deployment, reconciler, register_demo,
    service,
};
use potato_core::{GroupVersionKind, NamespacedName};
use potato_reconciler::{
    ConvergeError, ErrorClass, InMemoryCluster, ManifestStatus, NextAction, PassStatus,
    ReconcileError,
};
use serde_json::json;

fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::new("apps", "v1", "Deployment")
}

fn target(name: &str) -> NamespacedName {
    NamespacedName::new(TARGET_NAMESPACE, name)
}

/// Given a repository with a Deployment and a Service
/// When two passes run with no change in between
/// Then the second pass reports Unchanged everywhere and writes nothing
#[tokio::test]
async fn second_pass_over_same_manifests_writes_nothing() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("01-web.yaml", &deployment("web", 2));
    source.write("02-web-svc.yaml", &service("web", 80));
    register_demo(&cluster, "https://example/repo").await;
    let reconciler = reconciler(&cluster, source.clone());

    let first = reconciler.reconcile(&demo_key()).await;
    assert_eq!(first.status, PassStatus::Converged);
    assert_eq!(first.count(&ManifestStatus::Created), 2);
    assert_eq!(first.next_action, NextAction::RequeueAfter(REQUEUE));
    assert_eq!(first.revision.as_deref(), Some("0123abcd"));

    cluster.reset_calls();
    let second = reconciler.reconcile(&demo_key()).await;
    assert_eq!(second.status, PassStatus::Converged);
    assert_eq!(second.count(&ManifestStatus::Unchanged), 2);
    assert!(!second.wrote_anything());
    assert_eq!(cluster.calls().writes(), 0);
}

/// Given a live Deployment whose managed and unmanaged fields were edited
/// When a pass runs
/// Then managed fields return to the declaration and unmanaged ones stay
#[tokio::test]
async fn drift_is_corrected_without_touching_unmanaged_fields() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("web.yaml", &deployment("web", 2));
    register_demo(&cluster, "https://example/repo").await;
    let reconciler = reconciler(&cluster, source.clone());
    reconciler.reconcile(&demo_key()).await;

    cluster
        .edit(&deployment_gvk(), &target("web"), |o| {
            o.data["spec"]["replicas"] = json!(9);
            o.metadata.annotations.insert("team".into(), "ops".into());
        })
        .await;

    let outcome = reconciler.reconcile(&demo_key()).await;
    assert_eq!(outcome.count(&ManifestStatus::Updated), 1);

    let live = cluster.peek(&deployment_gvk(), &target("web")).await.unwrap();
    assert_eq!(live.data["spec"]["replicas"], 2);
    assert_eq!(live.metadata.annotations["team"], "ops");
}

/// Given five manifests where the third is malformed
/// When a pass runs
/// Then the first two converge, the last two are never read, and the pass
/// waits for the source to change
#[tokio::test]
async fn malformed_manifest_stops_the_pass_after_earlier_files() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("01.yaml", &deployment("one", 1));
    source.write("02.yaml", &deployment("two", 1));
    source.write("03.yaml", "apiVersion: apps/v1\nkind: [Deployment\n");
    source.write("04.yaml", &deployment("four", 1));
    source.write("05.yaml", &deployment("five", 1));
    register_demo(&cluster, "https://example/repo").await;

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    let files: Vec<&str> = outcome.manifests.iter().map(|m| m.file.as_str()).collect();
    assert_eq!(files, vec!["01.yaml", "02.yaml", "03.yaml"]);
    assert!(matches!(
        outcome.manifests[2].status,
        ManifestStatus::Failed { .. }
    ));
    assert!(matches!(
        outcome.error(),
        Some(ReconcileError::Decode { file, .. }) if file == "03.yaml"
    ));
    assert_eq!(outcome.next_action, NextAction::RequeueAfter(REQUEUE));

    assert_eq!(cluster.calls().creates, 2);
    assert!(cluster.peek(&deployment_gvk(), &target("two")).await.is_some());
    assert!(cluster.peek(&deployment_gvk(), &target("four")).await.is_none());
    assert!(cluster.peek(&deployment_gvk(), &target("five")).await.is_none());
}

/// Given a manifest of a kind with no adapter
/// When a pass runs
/// Then the pass stops there and later manifests are not applied
#[tokio::test]
async fn unrecognized_kind_stops_the_pass() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("a.yaml", &deployment("web", 1));
    source.write(
        "b.yaml",
        "apiVersion: example.io/v1\nkind: Widget\nmetadata:\n  name: w\n",
    );
    source.write("c.yaml", &service("web", 80));
    register_demo(&cluster, "https://example/repo").await;

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(
        outcome.error(),
        Some(ReconcileError::Dispatch { .. })
    ));
    assert_eq!(
        outcome.manifests[1].gvk,
        Some(GroupVersionKind::new("example.io", "v1", "Widget"))
    );
    assert_eq!(outcome.manifests.len(), 2);
    assert_eq!(outcome.next_action, NextAction::RequeueAfter(REQUEUE));
    assert_eq!(cluster.objects().await.len(), 1);
}

/// Given a live Deployment controlled by another Application
/// When a pass converges a declaration with the same name
/// Then nothing is written and the conflict is reported as terminal
#[tokio::test]
async fn object_owned_elsewhere_is_a_terminal_conflict() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("web.yaml", &deployment("web", 2));
    let app = register_demo(&cluster, "https://example/repo").await;

    // A pre-existing object owned by another Application.
    let mut other = app.clone();
    other.metadata.uid = Some("someone-else".into());
    let mut existing = potato_manifest::decode(deployment("web", 5).as_bytes())
        .unwrap()
        .object;
    existing.metadata.namespace = Some(TARGET_NAMESPACE.into());
    cluster
        .insert(potato_reconciler::bind(&existing, &other).unwrap())
        .await
        .unwrap();

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(
        outcome.error(),
        Some(ReconcileError::Converge {
            source: ConvergeError::OwnershipConflict { .. },
            ..
        })
    ));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Terminal));
    assert_eq!(outcome.next_action, NextAction::Backoff);
    assert_eq!(cluster.calls().writes(), 0);
}

#[tokio::test]
async fn sync_failure_backs_off_without_reading_manifests() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("web.yaml", &deployment("web", 2));
    source.fail_sync.store(true, Ordering::SeqCst);
    register_demo(&cluster, "https://example/repo").await;

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(outcome.error(), Some(ReconcileError::Sync { .. })));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Retryable));
    assert_eq!(outcome.next_action, NextAction::Backoff);
    assert!(outcome.manifests.is_empty());
    assert_eq!(cluster.calls().gets, 0);
}

#[tokio::test]
async fn missing_manifest_directory_fails_discovery() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    std::fs::remove_dir(source.manifest_dir()).unwrap();
    register_demo(&cluster, "https://example/repo").await;

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(outcome.error(), Some(ReconcileError::Discover { .. })));
    assert_eq!(outcome.next_action, NextAction::Backoff);
}

/// Given an Application that no longer exists
/// When a pass runs
/// Then the mirror is torn down, nothing else is touched, and the pass is done
#[tokio::test]
async fn deleted_application_tears_down_and_finishes() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.write("web.yaml", &deployment("web", 2));
    let reconciler = reconciler(&cluster, source.clone());

    let outcome = reconciler.reconcile(&demo_key()).await;
    assert_eq!(outcome.status, PassStatus::Deleted);
    assert_eq!(outcome.next_action, NextAction::Done);
    assert!(outcome.is_success());
    assert_eq!(source.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(source.ensures.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.calls(), Default::default());

    let again = reconciler.reconcile(&demo_key()).await;
    assert_eq!(again.status, PassStatus::Deleted);
}

#[tokio::test]
async fn failed_teardown_is_terminal_and_retried() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    source.fail_teardown.store(true, Ordering::SeqCst);

    let outcome = reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    assert!(matches!(outcome.error(), Some(ReconcileError::Teardown { .. })));
    assert_eq!(outcome.error_class(), Some(ErrorClass::Terminal));
    assert_eq!(outcome.next_action, NextAction::Backoff);
}

#[tokio::test]
async fn declared_namespace_is_replaced_by_target() {
    let cluster = Arc::new(InMemoryCluster::new());
    let source = Arc::new(DirectorySource::new());
    let manifest = deployment("web", 1).replace(
        "metadata:\n  name: web\n",
        "metadata:\n  name: web\n  namespace: somewhere-else\n",
    );
    source.write("web.yaml", &manifest);
    register_demo(&cluster, "https://example/repo").await;

    reconciler(&cluster, source.clone())
        .reconcile(&demo_key())
        .await;

    let objects = cluster.objects().await;
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].metadata.namespace.as_deref(), Some(TARGET_NAMESPACE));
}

//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use potato_core::{Application, GroupVersionKind, NamespacedName};
use potato_manifest::DynamicObject;
use potato_reconciler::{
    AdapterRegistry, ApplicationReconciler, HostError, InMemoryCluster, ResourceApi,
};
use potato_source::{SourceSync, SyncError, SyncReport, SyncStatus};
use tempfile::TempDir;

pub const TARGET_NAMESPACE: &str = "target-ns";
pub const REQUEUE: Duration = Duration::from_secs(10);

/// A source whose mirror is a plain directory the test writes into.
pub struct DirectorySource {
    root: TempDir,
    pub ensures: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub fail_sync: AtomicBool,
    pub fail_teardown: AtomicBool,
}

impl DirectorySource {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("kubernetes")).unwrap();
        Self {
            root,
            ensures: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            fail_sync: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
        }
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.root.path().join("kubernetes")
    }

    pub fn write(&self, file: &str, contents: &str) {
        std::fs::write(self.manifest_dir().join(file), contents).unwrap();
    }
}

#[async_trait]
impl SourceSync for DirectorySource {
    fn mirror_path(&self, _key: &NamespacedName) -> PathBuf {
        self.root.path().to_path_buf()
    }

    async fn ensure(
        &self,
        _key: &NamespacedName,
        repository: &str,
        reference: &str,
    ) -> Result<SyncReport, SyncError> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(SyncError::clone_failed(repository, reference, "remote unreachable"));
        }
        Ok(SyncReport {
            path: self.root.path().to_path_buf(),
            manifest_dir: self.manifest_dir(),
            revision: Some("0123abcd".to_string()),
            status: SyncStatus::UpToDate,
        })
    }

    async fn teardown(&self, _key: &NamespacedName) -> Result<bool, SyncError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(SyncError::teardown_failed(self.root.path(), "device busy"));
        }
        Ok(false)
    }
}

pub fn demo_key() -> NamespacedName {
    NamespacedName::new("default", "demo")
}

pub async fn register_demo(cluster: &InMemoryCluster, repository: &str) -> Application {
    cluster
        .put_application(Application::new(&demo_key(), repository, "main"))
        .await
}

pub fn reconciler(
    cluster: &Arc<InMemoryCluster>,
    source: Arc<dyn SourceSync>,
) -> ApplicationReconciler {
    ApplicationReconciler::builder()
        .with_applications(cluster.clone())
        .with_source(source)
        .with_adapters(AdapterRegistry::with_default_kinds(
            cluster.clone(),
            TARGET_NAMESPACE,
        ))
        .requeue_interval(REQUEUE)
        .build()
        .unwrap()
}

/// Reconciler whose adapters write through `host` instead of the cluster.
pub fn reconciler_with_host(
    cluster: &Arc<InMemoryCluster>,
    host: Arc<dyn ResourceApi>,
    source: Arc<dyn SourceSync>,
) -> ApplicationReconciler {
    ApplicationReconciler::builder()
        .with_applications(cluster.clone())
        .with_source(source)
        .with_adapters(AdapterRegistry::with_default_kinds(host, TARGET_NAMESPACE))
        .requeue_interval(REQUEUE)
        .build()
        .unwrap()
}

/// What [`FaultyHost`] does to calls for its target object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reads fail.
    Get,
    /// Creates fail.
    Create,
    /// Reads succeed, then another writer edits the object.
    EditAfterGet,
}

/// Resource API over an [`InMemoryCluster`] that misbehaves for one object.
pub struct FaultyHost {
    cluster: Arc<InMemoryCluster>,
    target: String,
    fault: Fault,
}

impl FaultyHost {
    pub fn new(cluster: Arc<InMemoryCluster>, target: &str, fault: Fault) -> Self {
        Self {
            cluster,
            target: target.to_string(),
            fault,
        }
    }

    fn hits(&self, key: &NamespacedName, fault: Fault) -> bool {
        self.fault == fault && key.name == self.target
    }
}

#[async_trait]
impl ResourceApi for FaultyHost {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject, HostError> {
        if self.hits(key, Fault::Get) {
            return Err(HostError::unavailable("connection reset"));
        }
        let live = self.cluster.get(gvk, key).await;
        if live.is_ok() && self.hits(key, Fault::EditAfterGet) {
            self.cluster
                .edit(gvk, key, |o| {
                    o.metadata.labels.insert("edited-by".into(), "someone".into());
                })
                .await;
        }
        live
    }

    async fn create(&self, object: DynamicObject) -> Result<DynamicObject, HostError> {
        if self.hits(&object.key(), Fault::Create) {
            return Err(HostError::unavailable("admission webhook timed out"));
        }
        self.cluster.create(object).await
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject, HostError> {
        self.cluster.update(object).await
    }
}

pub fn deployment(name: &str, replicas: u32) -> String {
    format!(
        r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
spec:
  replicas: {replicas}
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      containers:
        - name: {name}
          image: nginx:1.27
"
    )
}

pub fn service(name: &str, port: u16) -> String {
    format!(
        r"apiVersion: v1
kind: Service
metadata:
  name: {name}
spec:
  selector:
    app: {name}
  ports:
    - name: http
      port: {port}
      targetPort: 8080
"
    )
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args([
            "-c",
            "user.name=potato",
            "-c",
            "user.email=potato@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

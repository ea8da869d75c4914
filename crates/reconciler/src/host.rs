//! Host interfaces and an in-memory host.
//!
//! The reconciler never talks to a cluster directly. It reads and writes
//! objects through [`ResourceApi`] and reads Application records through
//! [`ApplicationApi`]. [`InMemoryCluster`] implements both and models the
//! parts of a real host the reconciler depends on: uid assignment,
//! optimistic concurrency and cascade deletion by owner reference.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use potato_core::{Application, GroupVersionKind, NamespacedName};
use potato_manifest::DynamicObject;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::HostError;

/// Read and write access to live objects.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Read a live object.
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject, HostError>;

    /// Create an object. Fails with [`HostError::AlreadyExists`] if one with
    /// the same kind and key exists.
    async fn create(&self, object: DynamicObject) -> Result<DynamicObject, HostError>;

    /// Replace an object. Fails with [`HostError::Conflict`] if the object
    /// carries a `resourceVersion` that is no longer current.
    async fn update(&self, object: DynamicObject) -> Result<DynamicObject, HostError>;
}

/// Read access to Application records.
#[async_trait]
pub trait ApplicationApi: Send + Sync {
    async fn get_application(&self, key: &NamespacedName) -> Result<Application, HostError>;

    async fn list_applications(&self) -> Result<Vec<Application>, HostError>;
}

/// Number of calls made against an [`InMemoryCluster`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
}

impl CallCounts {
    /// Creates plus updates.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.creates.saturating_add(self.updates)
    }
}

type ObjectKey = (GroupVersionKind, NamespacedName);

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    applications: BTreeMap<NamespacedName, Application>,
    version: u64,
}

impl ClusterState {
    fn next_version(&mut self) -> String {
        self.version = self.version.saturating_add(1);
        self.version.to_string()
    }
}

/// In-memory host holding objects and Application records.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an Application record, assigning a uid if it has none.
    pub async fn put_application(&self, mut application: Application) -> Application {
        let mut state = self.state.write().await;
        if application.metadata.uid.is_none() {
            application.metadata.uid = Some(Ulid::new().to_string());
        }
        application.metadata.resource_version = Some(state.next_version());
        state
            .applications
            .insert(application.key(), application.clone());
        application
    }

    /// Delete an Application record and every object it owns.
    ///
    /// Returns the removed record and the number of objects collected.
    pub async fn delete_application(&self, key: &NamespacedName) -> Option<(Application, usize)> {
        let mut state = self.state.write().await;
        let application = state.applications.remove(key)?;
        let uid = application.metadata.uid.clone().unwrap_or_default();

        let before = state.objects.len();
        state
            .objects
            .retain(|_, object| !object.metadata.is_owned_by(&uid));
        let collected = before.saturating_sub(state.objects.len());

        info!(application = %key, collected, "Deleted application");
        Some((application, collected))
    }

    /// Store an object as-is, bypassing the resource API and its counters.
    pub async fn insert(&self, mut object: DynamicObject) -> Result<DynamicObject, HostError> {
        let gvk = object_gvk(&object)?;
        let mut state = self.state.write().await;
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(Ulid::new().to_string());
        }
        object.metadata.resource_version = Some(state.next_version());
        state.objects.insert((gvk, object.key()), object.clone());
        Ok(object)
    }

    /// Modify a stored object out of band, the way another writer would.
    ///
    /// Returns `false` when no such object exists.
    pub async fn edit<F>(&self, gvk: &GroupVersionKind, key: &NamespacedName, f: F) -> bool
    where
        F: FnOnce(&mut DynamicObject),
    {
        let mut state = self.state.write().await;
        let version = state.next_version();
        match state.objects.get_mut(&(gvk.clone(), key.clone())) {
            Some(object) => {
                f(object);
                object.metadata.resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    /// Read an object without counting the call.
    pub async fn peek(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Option<DynamicObject> {
        self.state
            .read()
            .await
            .objects
            .get(&(gvk.clone(), key.clone()))
            .cloned()
    }

    /// Every stored object, ordered by kind and key.
    pub async fn objects(&self) -> Vec<DynamicObject> {
        self.state.read().await.objects.values().cloned().collect()
    }

    /// Calls made through [`ResourceApi`] so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            gets: self.gets.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
        }
    }

    pub fn reset_calls(&self) {
        self.gets.store(0, Ordering::Relaxed);
        self.creates.store(0, Ordering::Relaxed);
        self.updates.store(0, Ordering::Relaxed);
    }
}

fn object_gvk(object: &DynamicObject) -> Result<GroupVersionKind, HostError> {
    object
        .gvk()
        .map_err(|e| HostError::unavailable(format!("rejected object: {e}")))
}

#[async_trait]
impl ResourceApi for InMemoryCluster {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject, HostError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.peek(gvk, key)
            .await
            .ok_or_else(|| HostError::not_found(&gvk.kind, key))
    }

    async fn create(&self, mut object: DynamicObject) -> Result<DynamicObject, HostError> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        let gvk = object_gvk(&object)?;
        let key = object.key();

        let mut state = self.state.write().await;
        let slot = (gvk, key);
        if state.objects.contains_key(&slot) {
            return Err(HostError::already_exists(&slot.0.kind, &slot.1));
        }

        object.metadata.uid = Some(Ulid::new().to_string());
        object.metadata.resource_version = Some(state.next_version());
        debug!(kind = %slot.0, key = %slot.1, "Created object");
        state.objects.insert(slot, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: DynamicObject) -> Result<DynamicObject, HostError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        let gvk = object_gvk(&object)?;
        let slot = (gvk, object.key());

        let mut state = self.state.write().await;
        let Some(current) = state.objects.get(&slot) else {
            return Err(HostError::not_found(&slot.0.kind, &slot.1));
        };

        let stale = object
            .metadata
            .resource_version
            .as_ref()
            .filter(|version| current.metadata.resource_version.as_ref() != Some(*version));
        if let Some(version) = stale {
            return Err(HostError::conflict(
                &slot.0.kind,
                &slot.1,
                format!("resourceVersion {version} is stale"),
            ));
        }

        object.metadata.uid.clone_from(&current.metadata.uid);
        object.metadata.resource_version = Some(state.next_version());
        debug!(kind = %slot.0, key = %slot.1, "Updated object");
        state.objects.insert(slot, object.clone());
        Ok(object)
    }
}

#[async_trait]
impl ApplicationApi for InMemoryCluster {
    async fn get_application(&self, key: &NamespacedName) -> Result<Application, HostError> {
        self.state
            .read()
            .await
            .applications
            .get(key)
            .cloned()
            .ok_or_else(|| HostError::not_found(potato_core::types::APPLICATION_KIND, key))
    }

    async fn list_applications(&self) -> Result<Vec<Application>, HostError> {
        Ok(self.state.read().await.applications.values().cloned().collect())
    }
}

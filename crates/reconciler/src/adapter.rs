//! Kind-specific reconciliation strategies and their registry.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use potato_core::{Application, GroupVersionKind, LAST_APPLIED_ANNOTATION, NamespacedName};
use potato_manifest::{Deployment, DynamicObject, Service, TypedResource};
use tracing::{debug, info};

use crate::diff::{FieldChange, managed_changes};
use crate::error::{ConvergeError, DispatchError};
use crate::host::ResourceApi;
use crate::outcome::ConvergeOutcome;
use crate::ownership::bind;

/// Reconciles declarations of one kind against the host.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Kind this adapter handles.
    fn gvk(&self) -> GroupVersionKind;

    /// Read the live object, `None` if it does not exist.
    async fn locate(&self, key: &NamespacedName) -> Result<Option<DynamicObject>, ConvergeError>;

    /// Create the declared object, bring its managed fields in line, or do
    /// nothing if they already match. The declared namespace is ignored.
    async fn converge(
        &self,
        declared: DynamicObject,
        owner: &Application,
    ) -> Result<ConvergeOutcome, ConvergeError>;
}

/// A kind whose declarations the reconciler manages.
pub trait ManagedKind: TypedResource {
    /// Paths, from the object root, of the subtrees the declaration owns.
    const MANAGED_FIELDS: &'static [&'static [&'static str]];

    /// Copy the managed fields of `declared` onto `live`.
    fn apply_managed(live: &mut Self, declared: &Self);
}

impl ManagedKind for Deployment {
    const MANAGED_FIELDS: &'static [&'static [&'static str]] = &[&["spec"]];

    fn apply_managed(live: &mut Self, declared: &Self) {
        live.spec = declared.spec.clone();
    }
}

impl ManagedKind for Service {
    const MANAGED_FIELDS: &'static [&'static [&'static str]] =
        &[&["spec", "selector"], &["spec", "ports"]];

    fn apply_managed(live: &mut Self, declared: &Self) {
        live.spec.selector = declared.spec.selector.clone();
        live.spec.ports = declared.spec.ports.clone();
    }
}

/// [`ResourceAdapter`] for any [`ManagedKind`].
///
/// Every managed object lives in the adapter's target namespace and carries
/// a controller reference to its Application plus a snapshot of the
/// declaration it was last written from.
pub struct TypedAdapter<K> {
    api: Arc<dyn ResourceApi>,
    namespace: String,
    kind: PhantomData<fn() -> K>,
}

impl<K> fmt::Debug for TypedAdapter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedAdapter")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedKind> TypedAdapter<K> {
    pub fn new(api: Arc<dyn ResourceApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            kind: PhantomData,
        }
    }

    /// Namespace every object of this adapter is written to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Parse and stamp a declaration: typed form plus its dynamic rendering in
    /// the target namespace, without owner or snapshot.
    fn prepare(&self, declared: DynamicObject) -> Result<(K, DynamicObject), ConvergeError> {
        let kind = K::gvk().kind;
        let name = declared.name().to_string();
        if name.is_empty() {
            return Err(ConvergeError::invalid_declaration(
                kind,
                name,
                "metadata.name is required",
            ));
        }

        let mut typed = K::from_dynamic(declared)
            .map_err(|e| ConvergeError::invalid_declaration(&kind, &name, e.reason()))?;
        let meta = typed.metadata_mut();
        meta.namespace = Some(self.namespace.clone());
        meta.uid = None;
        meta.resource_version = None;
        meta.owner_references.clear();
        meta.annotations.remove(LAST_APPLIED_ANNOTATION);

        let rendered = typed
            .to_dynamic()
            .map_err(|e| ConvergeError::invalid_declaration(&kind, &name, e.reason()))?;
        Ok((typed, rendered))
    }

    async fn create(
        &self,
        key: &NamespacedName,
        desired: &DynamicObject,
        snapshot: String,
        owner: &Application,
    ) -> Result<ConvergeOutcome, ConvergeError> {
        let kind = K::gvk().kind;
        let mut object = bind(desired, owner)
            .map_err(|e| ConvergeError::from_ownership(&kind, key, &e))?;
        object
            .metadata
            .annotations
            .insert(LAST_APPLIED_ANNOTATION.to_string(), snapshot);

        self.api
            .create(object)
            .await
            .map_err(|e| ConvergeError::create_failed(&kind, key, e.to_string()))?;
        info!(kind = %kind, object = %key, "Created resource");
        Ok(ConvergeOutcome::Created)
    }

    async fn update(
        &self,
        key: &NamespacedName,
        live: DynamicObject,
        desired: &K,
        snapshot: String,
        owner: &Application,
        changes: &[FieldChange],
    ) -> Result<ConvergeOutcome, ConvergeError> {
        let kind = K::gvk().kind;
        let mut merged = K::from_dynamic(live).map_err(|e| {
            ConvergeError::locate_failed(
                &kind,
                key,
                format!("live object does not decode: {}", e.reason()),
            )
        })?;
        K::apply_managed(&mut merged, desired);

        let rendered = merged
            .to_dynamic()
            .map_err(|e| ConvergeError::update_failed(&kind, key, e.reason()))?;
        let mut object = bind(&rendered, owner)
            .map_err(|e| ConvergeError::from_ownership(&kind, key, &e))?;
        object
            .metadata
            .annotations
            .insert(LAST_APPLIED_ANNOTATION.to_string(), snapshot);

        self.api
            .update(object)
            .await
            .map_err(|e| ConvergeError::update_failed(&kind, key, e.to_string()))?;

        let changed: Vec<String> = changes.iter().map(|c| c.path.clone()).collect();
        info!(kind = %kind, object = %key, changed = ?changed, "Updated resource");
        Ok(ConvergeOutcome::Updated { changed })
    }
}

#[async_trait]
impl<K: ManagedKind> ResourceAdapter for TypedAdapter<K> {
    fn gvk(&self) -> GroupVersionKind {
        K::gvk()
    }

    async fn locate(&self, key: &NamespacedName) -> Result<Option<DynamicObject>, ConvergeError> {
        let gvk = K::gvk();
        match self.api.get(&gvk, key).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ConvergeError::locate_failed(gvk.kind, key, e.to_string())),
        }
    }

    async fn converge(
        &self,
        declared: DynamicObject,
        owner: &Application,
    ) -> Result<ConvergeOutcome, ConvergeError> {
        let kind = K::gvk().kind;
        let (desired, rendered) = self.prepare(declared)?;
        let key = rendered.key();
        let snapshot = serde_json::to_string(&rendered)
            .map_err(|e| ConvergeError::invalid_declaration(&kind, &key.name, e.to_string()))?;

        let Some(live) = self.locate(&key).await? else {
            return self.create(&key, &rendered, snapshot, owner).await;
        };

        let last_applied = last_applied(&live);
        let mut changes = managed_changes(
            K::MANAGED_FIELDS,
            &live.data,
            &rendered.data,
            last_applied.as_ref().map(|last| &last.data),
        );

        let bound = bind(&live, owner)
            .map_err(|e| ConvergeError::from_ownership(&kind, &key, &e))?;
        if bound.metadata.owner_references != live.metadata.owner_references {
            changes.push(FieldChange {
                path: "metadata.ownerReferences".to_string(),
                live: None,
                declared: None,
            });
        }

        if changes.is_empty() {
            debug!(kind = %kind, object = %key, "Resource unchanged");
            return Ok(ConvergeOutcome::Unchanged);
        }

        self.update(&key, live, &desired, snapshot, owner, &changes)
            .await
    }
}

/// Parse the last-applied snapshot annotation of a live object, if present
/// and readable.
#[must_use]
pub fn last_applied(live: &DynamicObject) -> Option<DynamicObject> {
    live.metadata
        .annotations
        .get(LAST_APPLIED_ANNOTATION)
        .and_then(|raw| serde_json::from_str(raw).ok())
}

/// Maps type tags to the adapter that handles them.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<GroupVersionKind, Arc<dyn ResourceAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl AdapterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with adapters for `Deployment` and `Service`, writing into
    /// `namespace`.
    pub fn with_default_kinds(api: Arc<dyn ResourceApi>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let mut registry = Self::new();
        registry.register(Arc::new(TypedAdapter::<Deployment>::new(
            Arc::clone(&api),
            namespace.clone(),
        )));
        registry.register(Arc::new(TypedAdapter::<Service>::new(api, namespace)));
        registry
    }

    /// Register an adapter under its own tag, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ResourceAdapter>) -> Option<Arc<dyn ResourceAdapter>> {
        self.adapters.insert(adapter.gvk(), adapter)
    }

    /// Builder-style [`AdapterRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ResourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter for `gvk`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnrecognizedKind`] when none is registered.
    pub fn resolve(&self, gvk: &GroupVersionKind) -> Result<Arc<dyn ResourceAdapter>, DispatchError> {
        self.adapters
            .get(gvk)
            .cloned()
            .ok_or_else(|| DispatchError::UnrecognizedKind { gvk: gvk.clone() })
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<GroupVersionKind> {
        self.adapters.keys().cloned().sorted().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

//! Reconciliation of Applications against a host resource API.
//!
//! This crate turns the manifests in an Application's repository into live
//! objects, in the manner of a Kubernetes controller:
//!
//! - **Resolve**: read the Application record; if it is gone, remove its mirror
//! - **Sync**: bring the local mirror up to date
//! - **Discover**: list the manifest files in file-name order
//! - **Decode + Dispatch**: route each declaration to the adapter for its kind
//! - **Converge**: create, update managed fields, or leave the object alone
//! - **Schedule**: tell the host when the next pass should run
//!
//! # Key Concepts
//!
//! ## Adapters
//!
//! A [`ResourceAdapter`] handles one kind. [`TypedAdapter`] implements it for
//! any [`ManagedKind`], which names the fields the declaration owns. Adapters
//! are looked up by type tag in an [`AdapterRegistry`]; a tag with no adapter
//! is a [`DispatchError::UnrecognizedKind`].
//!
//! ## Ownership
//!
//! Every object the reconciler writes carries a controller reference to its
//! Application (see [`bind`]) and a snapshot of the declaration it was written
//! from. The host deletes owned objects when the Application is deleted.
//!
//! ## Outcomes
//!
//! [`ApplicationReconciler::reconcile`] always returns a [`ReconcileOutcome`]
//! carrying a [`NextAction`]; the reconciler never schedules itself. The
//! [`Controller`] is a reference host that honours those actions.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use potato_core::{Application, ControllerConfig, NamespacedName};
//! use potato_reconciler::{AdapterRegistry, ApplicationReconciler, InMemoryCluster};
//! use potato_source::GitSourceSync;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::default();
//!     let cluster = Arc::new(InMemoryCluster::new());
//!     let key = NamespacedName::new("default", "demo");
//!     cluster
//!         .put_application(Application::new(&key, "https://example/repo", "main"))
//!         .await;
//!
//!     let reconciler = ApplicationReconciler::builder()
//!         .with_applications(cluster.clone())
//!         .with_source(Arc::new(GitSourceSync::new(&config)))
//!         .with_adapters(AdapterRegistry::with_default_kinds(
//!             cluster.clone(),
//!             config.target_namespace.clone(),
//!         ))
//!         .with_config(&config)
//!         .build()
//!         .ok_or("reconciler is missing a dependency")?;
//!
//!     let outcome = reconciler.reconcile(&key).await;
//!     println!("{:?}", outcome.next_action);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod adapter;
pub mod controller;
pub mod diff;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod outcome;
pub mod ownership;

// Re-export main types
pub use adapter::{AdapterRegistry, ManagedKind, ResourceAdapter, TypedAdapter, last_applied};
pub use controller::{Controller, ControllerStopper, LoopConfig, Schedule};
pub use diff::{FieldChange, managed_changes};
pub use error::{
    ConvergeError, DispatchError, ErrorClass, HostError, OwnershipError, ReconcileError, Result,
};
pub use host::{ApplicationApi, CallCounts, InMemoryCluster, ResourceApi};
pub use orchestrator::{ApplicationReconciler, ReconcilerBuilder};
pub use outcome::{
    ConvergeOutcome, ManifestReport, ManifestStatus, NextAction, PassStatus, ReconcileOutcome,
};
pub use ownership::bind;

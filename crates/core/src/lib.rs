//! Core types, configuration and errors for potato.
//!
//! Every other crate in the workspace speaks in terms of the object model
//! defined here: identities ([`NamespacedName`]), type tags
//! ([`GroupVersionKind`]), object metadata with owner references, and the
//! [`Application`] record the reconciler is driven by.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod types;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use types::{
    Application, ApplicationSpec, ApplicationStatus, GroupVersionKind, LAST_APPLIED_ANNOTATION,
    NamespacedName, ObjectMeta, OwnerReference,
};

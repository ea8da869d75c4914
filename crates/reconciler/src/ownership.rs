//! Binding managed resources to the Application that declares them.

use potato_core::Application;
use potato_manifest::DynamicObject;

use crate::error::OwnershipError;

/// Return a copy of `resource` controlled by `owner`.
///
/// The copy carries exactly one controller reference, pointing at `owner`;
/// any earlier reference to the same owner uid is replaced and references to
/// other, non-controlling owners are kept. The host's garbage collector uses
/// this reference to delete the resource when the Application is deleted.
///
/// # Errors
///
/// Returns [`OwnershipError::OwnerWithoutUid`] if `owner` has no uid, and
/// [`OwnershipError::AlreadyControlled`] if a different owner is already the
/// controller of `resource`.
pub fn bind(resource: &DynamicObject, owner: &Application) -> Result<DynamicObject, OwnershipError> {
    if owner.metadata.uid.as_deref().is_none_or(str::is_empty) {
        return Err(OwnershipError::OwnerWithoutUid {
            owner: owner.key().to_string(),
        });
    }
    let reference = owner.owner_reference();

    if let Some(existing) = resource.metadata.controller_reference() {
        if existing.uid != reference.uid {
            return Err(OwnershipError::AlreadyControlled {
                object: resource.key().to_string(),
                controller: format!("{} '{}' ({})", existing.kind, existing.name, existing.uid),
            });
        }
    }

    let mut bound = resource.clone();
    bound
        .metadata
        .owner_references
        .retain(|r| r.uid != reference.uid);
    bound.metadata.owner_references.push(reference);
    Ok(bound)
}

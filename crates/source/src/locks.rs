//! Per-Application pass locks.

use std::collections::HashMap;
use std::sync::Arc;

use potato_core::NamespacedName;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per Application identity.
///
/// Holding the guard across sync, discovery and dispatch keeps two passes for
/// the same Application from interleaving, even when the caller does not
/// serialize them itself. Passes for different Applications never contend.
#[derive(Debug, Clone, Default)]
pub struct PassLocks {
    slots: Arc<Mutex<HashMap<NamespacedName, Arc<Mutex<()>>>>>,
}

impl PassLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &NamespacedName) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Drop the slot for `key` unless a pass currently holds or awaits it.
    pub async fn forget(&self, key: &NamespacedName) {
        let mut slots = self.slots.lock().await;
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }

    /// Number of identities with a slot.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

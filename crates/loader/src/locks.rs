use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tlc_core::PartitionKey;
use tokio::sync::OwnedMutexGuard;

/// Per-partition mutual exclusion for concurrent loads.
///
/// Two loads of the same key serialise; different keys never wait on each
/// other. The guard releases the key when dropped.
#[derive(Debug, Default)]
pub struct PartitionLocks {
    inner: Mutex<HashMap<PartitionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &PartitionKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map holds an idle slot; held or awaited ones have clones.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(map.entry(*key).or_default())
        };
        slot.lock_owned().await
    }

    /// Keys currently tracked, held or not yet pruned.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

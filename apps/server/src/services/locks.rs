//! Per-resource write serialization.
//!
//! Two concurrent versioned writes for the same `(resourceType, id)` could
//! both read the same next version number and both flip the current flag.
//! The graph backend only guarantees per-step atomicity, so writers take a
//! process-local lock keyed on `resourceType|id` around the whole
//! read-archive-write sequence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ResourceLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for one resource identity. The guard releases
    /// on drop. The key map grows with the number of distinct resources ever
    /// written; entries are tiny and reused.
    pub async fn acquire(&self, resource_type: &str, fhir_id: &str) -> OwnedMutexGuard<()> {
        let key = format!("{resource_type}|{fhir_id}");
        let lock = {
            let mut map = self.inner.lock();
            map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

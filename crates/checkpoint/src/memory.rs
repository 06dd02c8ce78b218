//! In-memory checkpoint storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::{CheckpointStore, StoreError, StoredCheckpoint};

/// In-process implementation of the `CheckpointStore` trait.
///
/// Backed by a mutex-guarded map, keyed by namespace. Useful for tests and
/// for embedding hosts that manage durability themselves. Enforces the same
/// sequence monotonicity rules as the durable backends.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, StoredCheckpoint>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of namespaces holding a committed checkpoint.
    pub fn namespace_count(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, namespace: &str) -> Result<Option<StoredCheckpoint>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.get(namespace).cloned())
    }

    async fn persist(
        &self,
        namespace: &str,
        checkpoint_data: String,
        sequence: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");

        let expected = inner.get(namespace).map(|s| s.sequence + 1).unwrap_or(1);
        if sequence != expected {
            return Err(StoreError::StaleCommit {
                namespace: namespace.to_string(),
                expected,
                got: sequence,
            });
        }

        inner.insert(
            namespace.to_string(),
            StoredCheckpoint {
                checkpoint_data,
                sequence,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }
}

//! Filesystem-based checkpoint storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;

use crate::store::{CheckpointStore, StoreError, StoredCheckpoint};

/// Filesystem implementation of the `CheckpointStore` trait.
///
/// Stores one JSON file per namespace under a directory, named
/// `<namespace>.json`. Writes go through a temp file followed by a rename
/// so a crash mid-write never leaves a torn checkpoint behind. Namespaces
/// are used verbatim as file stems and must be filesystem-safe.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }

    fn read(&self, namespace: &str) -> Result<Option<StoredCheckpoint>, StoreError> {
        let path = self.path_for(namespace);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let stored =
            serde_json::from_str(&content).map_err(|err| StoreError::Corrupt {
                namespace: namespace.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(stored))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn load(&self, namespace: &str) -> Result<Option<StoredCheckpoint>, StoreError> {
        self.read(namespace)
    }

    async fn persist(
        &self,
        namespace: &str,
        checkpoint_data: String,
        sequence: u64,
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;

        let expected = self.read(namespace)?.map(|s| s.sequence + 1).unwrap_or(1);
        if sequence != expected {
            return Err(StoreError::StaleCommit {
                namespace: namespace.to_string(),
                expected,
                got: sequence,
            });
        }

        let stored = StoredCheckpoint {
            checkpoint_data,
            sequence,
            created_at: Utc::now(),
        };

        let path = self.path_for(namespace);
        let tmp = self.dir.join(format!("{namespace}.json.tmp"));
        let body = serde_json::to_string_pretty(&stored)
            .map_err(|err| StoreError::PersistError(err.to_string()))?;

        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(
            namespace,
            sequence,
            "stored checkpoint to {}",
            path.display()
        );
        Ok(())
    }
}

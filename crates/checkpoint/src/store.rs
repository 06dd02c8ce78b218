//! Checkpoint storage trait and persisted types
//!
//! This module defines the `CheckpointStore` trait for backend-agnostic
//! checkpoint persistence, plus the shared stored representation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for checkpoint storage operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to durably persist a checkpoint.
    ///
    /// Retryable: nothing downstream has advanced, so the caller may
    /// re-commit the same staged value.
    #[error("failed to persist checkpoint: {0}")]
    PersistError(String),

    /// A commit arrived with a sequence number that is not exactly one
    /// past the last committed sequence for the namespace.
    #[error(
        "stale commit for namespace '{namespace}': expected sequence {expected}, got {got}"
    )]
    StaleCommit {
        namespace: String,
        expected: u64,
        got: u64,
    },

    /// Another session already holds the commit lock for the namespace.
    #[error("namespace '{0}' already has an active checkpoint session")]
    ActiveNamespace(String),

    /// The stored blob could not be decoded.
    #[error("stored checkpoint for namespace '{namespace}' is corrupt: {reason}")]
    Corrupt { namespace: String, reason: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::PersistError(err.to_string())
    }
}

/// Checkpoint data as persisted by a backend, per namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Opaque serialized checkpoint blob (JSON-encoded cursor map)
    pub checkpoint_data: String,
    /// Monotonically increasing commit sequence, starting at 1
    pub sequence: u64,
    /// Timestamp when the checkpoint was committed
    pub created_at: DateTime<Utc>,
}

/// Trait for checkpoint storage operations.
///
/// This trait abstracts the storage backend for checkpoint persistence,
/// allowing the same staging/commit logic to work with:
/// - Filesystem storage ([`crate::FilesystemStore`])
/// - In-memory storage ([`crate::MemoryStore`])
///
/// Backends must enforce sequence monotonicity: `persist` with a sequence
/// other than `last + 1` (or `1` for a fresh namespace) fails with
/// [`StoreError::StaleCommit`] and leaves the stored state untouched.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the last durably committed checkpoint for a namespace.
    ///
    /// Returns `None` for a first-ever run.
    async fn load(&self, namespace: &str) -> Result<Option<StoredCheckpoint>, StoreError>;

    /// Durably persist a checkpoint blob at the given commit sequence.
    async fn persist(
        &self,
        namespace: &str,
        checkpoint_data: String,
        sequence: u64,
    ) -> Result<(), StoreError>;
}

//! Staged-commit checkpoint sessions with namespace locking.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::store::{CheckpointStore, StoreError};
use crate::Checkpoint;

/// Registry of namespaces with an active checkpoint session.
///
/// Guarantees at-most-one in-flight committer per namespace within a host
/// process: two concurrent runs over the same namespace cannot interleave
/// checkpoint writes. Cloning shares the underlying registry, so a host
/// scheduler hands the same `NamespaceLocks` to every driver it creates.
#[derive(Clone, Default)]
pub struct NamespaceLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl NamespaceLocks {
    /// Create an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, namespace: &str) -> Result<(), StoreError> {
        let mut active = self.active.lock().expect("lock registry poisoned");
        if !active.insert(namespace.to_string()) {
            return Err(StoreError::ActiveNamespace(namespace.to_string()));
        }
        Ok(())
    }

    fn release(&self, namespace: &str) {
        let mut active = self.active.lock().expect("lock registry poisoned");
        active.remove(namespace);
    }
}

/// Per-run handle over one namespace's checkpoint state.
///
/// The session implements the transmit-then-checkpoint ordering at the
/// heart of the at-least-once guarantee:
///
/// 1. [`stage`](Self::stage) records a candidate checkpoint in memory
/// 2. after the corresponding batch is acknowledged by the destination,
///    [`commit`](Self::commit) persists it at the next commit sequence
///
/// A crash between transmit and commit leaves the prior checkpoint in
/// place, so the next run re-emits some already-delivered operations.
/// That is safe because destination-side application is idempotent per
/// primary key.
///
/// A failed [`commit`](Self::commit) with [`StoreError::PersistError`]
/// keeps the staged value, so the caller may retry the commit verbatim.
pub struct CheckpointSession {
    store: Arc<dyn CheckpointStore>,
    locks: NamespaceLocks,
    namespace: String,
    committed_sequence: u64,
    last_committed: Option<Checkpoint>,
    staged: Option<Checkpoint>,
}

impl std::fmt::Debug for CheckpointSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointSession")
            .field("namespace", &self.namespace)
            .field("committed_sequence", &self.committed_sequence)
            .field("last_committed", &self.last_committed)
            .field("staged", &self.staged)
            .finish_non_exhaustive()
    }
}

impl CheckpointSession {
    /// Open a session for a namespace, acquiring its lock and loading the
    /// last durably committed checkpoint.
    ///
    /// Fails with [`StoreError::ActiveNamespace`] if another session holds
    /// the namespace, or [`StoreError::Corrupt`] if the stored blob does
    /// not decode.
    pub async fn open(
        store: Arc<dyn CheckpointStore>,
        locks: NamespaceLocks,
        namespace: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let namespace = namespace.into();
        locks.acquire(&namespace)?;

        let loaded = match store.load(&namespace).await {
            Ok(loaded) => loaded,
            Err(err) => {
                locks.release(&namespace);
                return Err(err);
            }
        };

        let (committed_sequence, last_committed) = match loaded {
            Some(stored) => {
                let checkpoint = match Checkpoint::from_json(&stored.checkpoint_data) {
                    Ok(cp) => cp,
                    Err(err) => {
                        locks.release(&namespace);
                        return Err(StoreError::Corrupt {
                            namespace,
                            reason: err.to_string(),
                        });
                    }
                };
                (stored.sequence, Some(checkpoint))
            }
            None => (0, None),
        };

        tracing::debug!(
            namespace = %namespace,
            sequence = committed_sequence,
            resumed = last_committed.is_some(),
            "opened checkpoint session"
        );

        Ok(Self {
            store,
            locks,
            namespace,
            committed_sequence,
            last_committed,
            staged: None,
        })
    }

    /// The namespace this session owns.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The last durably committed checkpoint, if any.
    pub fn last_committed(&self) -> Option<&Checkpoint> {
        self.last_committed.as_ref()
    }

    /// The staged-but-uncommitted checkpoint, if any.
    pub fn staged(&self) -> Option<&Checkpoint> {
        self.staged.as_ref()
    }

    /// Record a candidate checkpoint to be committed once the batch it
    /// covers has been acknowledged. Replaces any previously staged value.
    pub fn stage(&mut self, checkpoint: Checkpoint) {
        self.staged = Some(checkpoint);
    }

    /// Durably persist the most recently staged checkpoint.
    ///
    /// No-op when nothing is staged. On [`StoreError::PersistError`] the
    /// staged value is retained for retry; any other error also leaves it
    /// in place, but those are not retryable.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let Some(staged) = self.staged.clone() else {
            return Ok(());
        };

        let data = staged
            .to_json()
            .map_err(|err| StoreError::PersistError(err.to_string()))?;
        let sequence = self.committed_sequence + 1;

        self.store.persist(&self.namespace, data, sequence).await?;

        self.committed_sequence = sequence;
        self.last_committed = Some(staged);
        self.staged = None;

        tracing::info!(
            namespace = %self.namespace,
            sequence,
            "committed checkpoint"
        );
        Ok(())
    }
}

impl Drop for CheckpointSession {
    fn drop(&mut self) {
        self.locks.release(&self.namespace);
    }
}

//! Checkpoint management for connector-sync
//!
//! Provides storage-agnostic persistence of resume state between sync
//! invocations of a connector.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines [`Checkpoint`], an opaque key/value cursor map owned by
//!   connector code and never interpreted by the driver
//! - Provides the [`CheckpointStore`] trait for durable storage backends
//! - Manages the stage-then-commit flow via [`CheckpointSession`], which
//!   also enforces at-most-one in-flight committer per namespace
//!
//! ## Storage Backends
//!
//! - [`FilesystemStore`] - one JSON file per namespace, atomic rename
//! - [`MemoryStore`] - in-process map, for tests and embedding
//!
//! Every committed checkpoint carries a monotonically increasing sequence
//! number; a backend rejects out-of-order commits with
//! [`StoreError::StaleCommit`], which is what makes concurrent runs over
//! the same namespace detectable.

mod filesystem;
mod memory;
mod session;
pub mod store;


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Re-export store trait and types
pub use store::{CheckpointStore, StoreError, StoredCheckpoint};

// Re-export storage implementations
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

// Re-export session types
pub use session::{CheckpointSession, NamespaceLocks};

/// A scalar cursor value inside a checkpoint.
///
/// Connectors store whatever resume markers they need: sequence numbers,
/// timestamps rendered as strings, page tokens. The driver never looks
/// inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    /// Null marker
    Null,
    /// Boolean flag
    Boolean(bool),
    /// Integer cursor (offsets, sequence ids)
    Integer(i64),
    /// Float cursor
    Float(f64),
    /// String cursor (timestamps, page tokens)
    String(String),
}

impl From<bool> for CursorValue {
    fn from(v: bool) -> Self {
        CursorValue::Boolean(v)
    }
}

impl From<i64> for CursorValue {
    fn from(v: i64) -> Self {
        CursorValue::Integer(v)
    }
}

impl From<i32> for CursorValue {
    fn from(v: i32) -> Self {
        CursorValue::Integer(v as i64)
    }
}

impl From<f64> for CursorValue {
    fn from(v: f64) -> Self {
        CursorValue::Float(v)
    }
}

impl From<&str> for CursorValue {
    fn from(v: &str) -> Self {
        CursorValue::String(v.to_string())
    }
}

impl From<String> for CursorValue {
    fn from(v: String) -> Self {
        CursorValue::String(v)
    }
}

/// Opaque, connector-defined resume state.
///
/// A checkpoint is an ordered map of string keys to scalar cursor values.
/// It is produced and consumed exclusively by connector code; the sync
/// driver persists and restores it as a blob.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
///
/// let mut state = Checkpoint::new();
/// state.set("last_synced", "2024-01-31T23:04:39Z");
/// state.set("offset", 42i64);
///
/// assert_eq!(state.get_str("last_synced"), Some("2024-01-31T23:04:39Z"));
/// assert_eq!(state.get_i64("offset"), Some(42));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    entries: BTreeMap<String, CursorValue>,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cursor value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CursorValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Get a cursor value by key.
    pub fn get(&self, key: &str) -> Option<&CursorValue> {
        self.entries.get(key)
    }

    /// Get an integer cursor by key.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(CursorValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Get a float cursor by key.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(CursorValue::Float(f)) => Some(*f),
            Some(CursorValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get a boolean cursor by key.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(CursorValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Get a string cursor by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(CursorValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether the checkpoint holds no cursors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cursors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over cursors in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CursorValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize to the stable JSON blob the store persists.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a checkpoint back from its persisted blob.
    pub fn from_json(blob: &str) -> serde_json::Result<Self> {
        serde_json::from_str(blob)
    }
}

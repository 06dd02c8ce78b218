//! Test infrastructure: an in-memory destination and a failure-injecting
//! checkpoint store.
//!
//! `MemoryDestination` applies batches the way a real destination is
//! required to: idempotently per primary key. That makes it usable both
//! for connector unit tests and for exercising the driver's at-least-once
//! guarantees (replaying a batch must converge to the same state).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::operation::{Batch, Operation, Row};
use crate::transport::{DestinationTransport, TransportError};
use checkpoint::{CheckpointStore, MemoryStore, StoreError, StoredCheckpoint};
use sync_core::SchemaSnapshot;

/// Separator between primary-key components in a rendered row key.
const KEY_SEP: char = '\u{1f}';

#[derive(Default)]
struct DestinationTable {
    /// Row key (rendered primary key) to row, in first-insertion order
    keys: Vec<String>,
    rows: HashMap<String, Row>,
    /// Append-only rows for tables without a primary key
    unkeyed: Vec<Row>,
}

/// In-memory destination with idempotent per-primary-key application.
///
/// Apply semantics:
/// - upsert: insert-or-replace the row at its primary key
/// - update: merge the provided columns into an existing row; a no-op
///   when the key is absent
/// - delete: remove the row at the key; a no-op when absent
/// - truncate: drop all rows of the table
///
/// Tables without a primary key (inference mode) are append-only.
///
/// Scripted failures let tests exercise the driver's retry and failure
/// paths: each queued error is returned by one `apply_batch` call, in
/// order, before any application happens.
#[derive(Default)]
pub struct MemoryDestination {
    schema: Option<SchemaSnapshot>,
    announcements: u64,
    batches_applied: u64,
    tables: HashMap<String, DestinationTable>,
    script: VecDeque<Option<TransportError>>,
}

impl MemoryDestination {
    /// Create an empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next unscripted `apply_batch`
    /// call.
    ///
    /// Script entries are consumed in order; a failing call applies
    /// nothing, matching the all-or-nothing batch contract.
    pub fn fail_next(&mut self, err: TransportError) {
        self.script.push_back(Some(err));
    }

    /// Queue a successful `apply_batch` call ahead of later failures.
    pub fn pass_next(&mut self) {
        self.script.push_back(None);
    }

    /// The most recently announced schema.
    pub fn schema(&self) -> Option<&SchemaSnapshot> {
        self.schema.as_ref()
    }

    /// Number of schema announcements received.
    pub fn announcements(&self) -> u64 {
        self.announcements
    }

    /// Number of batches successfully applied.
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied
    }

    /// Number of rows currently held for a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map(|t| t.rows.len() + t.unkeyed.len())
            .unwrap_or(0)
    }

    /// All rows of a table, keyed rows first in insertion order.
    pub fn rows(&self, table: &str) -> Vec<&Row> {
        match self.tables.get(table) {
            Some(t) => t
                .keys
                .iter()
                .filter_map(|k| t.rows.get(k))
                .chain(t.unkeyed.iter())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Look up a row by its primary-key values.
    pub fn get_row(&self, table: &str, key: &Row) -> Option<&Row> {
        let rendered = self.render_key(table, key)?;
        self.tables.get(table)?.rows.get(&rendered)
    }

    fn render_key(&self, table: &str, row: &Row) -> Option<String> {
        let schema = self.schema.as_ref()?;
        let table_schema = schema.get_table(table)?;
        if table_schema.primary_key.is_empty() {
            return None;
        }

        let mut rendered = String::new();
        for key in &table_schema.primary_key {
            let value = row.get(key)?;
            if !rendered.is_empty() {
                rendered.push(KEY_SEP);
            }
            rendered.push_str(&value.to_string());
        }
        Some(rendered)
    }

    fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::Truncate { table } => {
                self.tables.remove(table);
            }
            Operation::Upsert { table, row } => match self.render_key(table, row) {
                Some(key) => {
                    let entry = self.tables.entry(table.clone()).or_default();
                    if entry.rows.insert(key.clone(), row.clone()).is_none() {
                        entry.keys.push(key);
                    }
                }
                None => {
                    self.tables
                        .entry(table.clone())
                        .or_default()
                        .unkeyed
                        .push(row.clone());
                }
            },
            Operation::Update { table, row } => {
                if let Some(key) = self.render_key(table, row) {
                    let entry = self.tables.entry(table.clone()).or_default();
                    if let Some(existing) = entry.rows.get_mut(&key) {
                        for (column, value) in row {
                            existing.insert(column.clone(), value.clone());
                        }
                    }
                }
            }
            Operation::Delete { table, key } => {
                if let Some(rendered) = self.render_key(table, key) {
                    if let Some(entry) = self.tables.get_mut(table) {
                        entry.rows.remove(&rendered);
                        entry.keys.retain(|k| k != &rendered);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DestinationTransport for MemoryDestination {
    async fn announce_schema(&mut self, schema: &SchemaSnapshot) -> Result<(), TransportError> {
        self.schema = Some(schema.clone());
        self.announcements += 1;
        Ok(())
    }

    async fn apply_batch(&mut self, batch: &Batch) -> Result<(), TransportError> {
        if let Some(Some(err)) = self.script.pop_front() {
            return Err(err);
        }

        for operation in batch {
            self.apply(operation);
        }
        self.batches_applied += 1;
        Ok(())
    }
}

/// Checkpoint store wrapper that fails a scripted number of persists.
///
/// Used to simulate the crash-between-transmit-and-commit window: the
/// batch is acknowledged, the commit fails, and the next run must resume
/// from the prior checkpoint.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: Mutex<u32>,
}

impl FlakyStore {
    /// Create a store that persists normally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` persist calls with `PersistError`.
    pub fn fail_persists(&self, n: u32) {
        *self.failures_left.lock().expect("failure counter poisoned") = n;
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn load(&self, namespace: &str) -> Result<Option<StoredCheckpoint>, StoreError> {
        self.inner.load(namespace).await
    }

    async fn persist(
        &self,
        namespace: &str,
        checkpoint_data: String,
        sequence: u64,
    ) -> Result<(), StoreError> {
        {
            let mut left = self.failures_left.lock().expect("failure counter poisoned");
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::PersistError(
                    "injected persist failure".to_string(),
                ));
            }
        }
        self.inner.persist(namespace, checkpoint_data, sequence).await
    }
}

//! Validated, ordered buffering of change operations.
//!
//! The [`OperationEmitter`] sits between connector code and the sync
//! driver: every emitted operation is validated against the schema
//! registry at emit time, appended to an in-memory buffer in emission
//! order, and later drained wholesale into an immutable [`Batch`] by
//! [`OperationEmitter::flush`].
//!
//! Ordering guarantees: operations are flushed in strict emission order
//! within a table, and cross-table ordering is preserved as emitted. No
//! reordering optimization is applied, so a delete emitted after an upsert
//! always reaches the destination after it.

use std::collections::HashSet;

use crate::operation::{Batch, Operation, Row};
use sync_core::{SchemaError, SchemaRegistry};

/// Error type for emit operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmitError {
    /// Schema validation failure, propagated from the registry
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A primary-key column is absent or null in the operation's mapping
    #[error(
        "{kind} on table '{table}' requires primary-key column '{column}' \
         to be present and non-null"
    )]
    MissingPrimaryKey {
        kind: &'static str,
        table: String,
        column: String,
    },

    /// Update/delete against a table that declares no primary key
    #[error("table '{table}' declares no primary key; {kind} requires one")]
    NoPrimaryKey { kind: &'static str, table: String },

    /// The buffer size policy was exceeded without an intervening flush
    #[error("operation buffer overflow: capacity {capacity} reached without a flush")]
    BufferOverflow { capacity: usize },

    /// A truncate arrived after operations for the same table were already
    /// flushed in this run
    #[error(
        "truncate of table '{table}' cannot be ordered after already-flushed \
         operations for that table; it requires a new run"
    )]
    OrderingViolation { table: String },
}

/// Validates and buffers operations against a schema registry.
///
/// Exclusively owned by a single sync run. The emitter owns the run's
/// [`SchemaRegistry`]; the driver reaches the registry through
/// [`Self::registry`] / [`Self::registry_mut`] for declaration and
/// announcement.
pub struct OperationEmitter {
    registry: SchemaRegistry,
    buffer: Vec<Operation>,
    capacity: usize,
    next_sequence: u64,
    flushed_tables: HashSet<String>,
}

impl OperationEmitter {
    /// Create an emitter over a registry with the given buffer capacity.
    pub fn new(registry: SchemaRegistry, capacity: usize) -> Self {
        Self {
            registry,
            buffer: Vec::new(),
            capacity,
            next_sequence: 0,
            flushed_tables: HashSet::new(),
        }
    }

    /// The run's schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable access to the run's schema registry.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// Number of operations currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Validate an operation and append it to the buffer.
    pub fn emit(&mut self, operation: Operation) -> Result<(), EmitError> {
        if self.buffer.len() >= self.capacity {
            return Err(EmitError::BufferOverflow {
                capacity: self.capacity,
            });
        }

        match &operation {
            Operation::Upsert { table, row } => {
                // Inference mode: an upsert may target an undeclared table
                self.registry.ensure_table(table);
                self.validate_row(table, row)?;
                self.require_keys_if_declared("upsert", table, row)?;
            }
            Operation::Update { table, row } => {
                self.require_table(table)?;
                self.validate_row(table, row)?;
                self.require_keys("update", table, row)?;
            }
            Operation::Delete { table, key } => {
                self.require_table(table)?;
                self.validate_row(table, key)?;
                self.require_keys("delete", table, key)?;
            }
            Operation::Truncate { table } => {
                self.require_table(table)?;
                if self.flushed_tables.contains(table) {
                    return Err(EmitError::OrderingViolation {
                        table: table.clone(),
                    });
                }
            }
        }

        self.buffer.push(operation);
        Ok(())
    }

    /// Atomically drain the buffer into an immutable, ordered batch.
    pub fn flush(&mut self) -> Batch {
        let operations = std::mem::take(&mut self.buffer);
        for op in &operations {
            self.flushed_tables.insert(op.table().to_string());
        }

        self.next_sequence += 1;
        tracing::debug!(
            sequence = self.next_sequence,
            operations = operations.len(),
            "flushed operation buffer"
        );
        Batch::new(self.next_sequence, operations)
    }

    fn require_table(&self, table: &str) -> Result<(), EmitError> {
        if !self.registry.contains(table) {
            return Err(EmitError::Schema(SchemaError::TableNotFound(
                table.to_string(),
            )));
        }
        Ok(())
    }

    fn validate_row(&mut self, table: &str, row: &Row) -> Result<(), EmitError> {
        for (column, value) in row {
            self.registry.ensure_column(table, column, value)?;
        }
        Ok(())
    }

    /// Primary-key columns must be present and non-null in the mapping.
    fn require_keys(&self, kind: &'static str, table: &str, row: &Row) -> Result<(), EmitError> {
        let entry = self
            .registry
            .get_table(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;

        if !entry.has_primary_key() {
            return Err(EmitError::NoPrimaryKey {
                kind,
                table: table.to_string(),
            });
        }

        for key in entry.primary_key() {
            match row.get(key) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(EmitError::MissingPrimaryKey {
                        kind,
                        table: table.to_string(),
                        column: key.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Like [`Self::require_keys`], but tolerates key-less tables: an
    /// upsert against an inference-mode table without a primary key is
    /// append-only and legal.
    fn require_keys_if_declared(
        &self,
        kind: &'static str,
        table: &str,
        row: &Row,
    ) -> Result<(), EmitError> {
        let has_key = self
            .registry
            .get_table(table)
            .is_some_and(|t| t.has_primary_key());
        if has_key {
            self.require_keys(kind, table, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use sync_core::{ColumnType, TableDecl, Value};

    fn emitter_with_users() -> OperationEmitter {
        let mut registry = SchemaRegistry::new();
        registry
            .declare_table(
                TableDecl::new("users")
                    .column("id", ColumnType::Integer)
                    .column("name", ColumnType::String)
                    .primary_key(["id"]),
            )
            .unwrap();
        OperationEmitter::new(registry, 64)
    }

    #[test]
    fn test_flush_preserves_emission_order() {
        let mut emitter = emitter_with_users();
        emitter
            .registry_mut()
            .declare_table(
                TableDecl::new("orders")
                    .column("id", ColumnType::Integer)
                    .primary_key(["id"]),
            )
            .unwrap();

        emitter
            .emit(Operation::upsert("users", row! { "id" => 1, "name" => "a" }))
            .unwrap();
        emitter
            .emit(Operation::upsert("orders", row! { "id" => 10 }))
            .unwrap();
        emitter
            .emit(Operation::delete("users", row! { "id" => 1 }))
            .unwrap();

        let batch = emitter.flush();
        assert_eq!(batch.sequence(), 1);
        assert_eq!(batch.len(), 3);

        // Cross-table order is exactly the emission order
        let kinds: Vec<(&str, &str)> = batch
            .operations()
            .iter()
            .map(|op| (op.table(), op.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![("users", "upsert"), ("orders", "upsert"), ("users", "delete")]
        );

        // A second flush is empty but advances the sequence
        assert_eq!(emitter.buffered(), 0);
        let next = emitter.flush();
        assert_eq!(next.sequence(), 2);
        assert!(next.is_empty());
    }

    #[test]
    fn test_upsert_requires_declared_primary_key_values() {
        let mut emitter = emitter_with_users();

        let err = emitter
            .emit(Operation::upsert("users", row! { "name" => "a" }))
            .unwrap_err();
        assert!(matches!(
            err,
            EmitError::MissingPrimaryKey { column, .. } if column == "id"
        ));

        // Null keys are as bad as missing ones
        let mut row = row! { "name" => "a" };
        row.insert("id".to_string(), Value::Null);
        let err = emitter.emit(Operation::upsert("users", row)).unwrap_err();
        assert!(matches!(err, EmitError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_delete_requires_key_columns() {
        let mut emitter = emitter_with_users();

        let err = emitter
            .emit(Operation::delete("users", row! { "name" => "a" }))
            .unwrap_err();
        assert!(matches!(
            err,
            EmitError::MissingPrimaryKey { kind: "delete", column, .. } if column == "id"
        ));

        emitter
            .emit(Operation::delete("users", row! { "id" => 1 }))
            .unwrap();
    }

    #[test]
    fn test_update_and_delete_need_a_declared_table() {
        let mut emitter = emitter_with_users();

        let err = emitter
            .emit(Operation::delete("ghosts", row! { "id" => 1 }))
            .unwrap_err();
        assert!(matches!(
            err,
            EmitError::Schema(SchemaError::TableNotFound(t)) if t == "ghosts"
        ));

        let err = emitter
            .emit(Operation::update("ghosts", row! { "id" => 1 }))
            .unwrap_err();
        assert!(matches!(err, EmitError::Schema(SchemaError::TableNotFound(_))));
    }

    #[test]
    fn test_inference_upsert_registers_table_implicitly() {
        let mut emitter = OperationEmitter::new(SchemaRegistry::new(), 64);

        emitter
            .emit(Operation::upsert("events", row! { "at" => 5, "what" => "boot" }))
            .unwrap();
        assert!(emitter.registry().contains("events"));

        // The implicit table has no primary key, so deletes are rejected
        let err = emitter
            .emit(Operation::delete("events", row! { "at" => 5 }))
            .unwrap_err();
        assert!(matches!(err, EmitError::NoPrimaryKey { kind: "delete", .. }));
    }

    #[test]
    fn test_inferred_columns_register_in_column_name_order() {
        let mut emitter = OperationEmitter::new(SchemaRegistry::new(), 64);

        emitter
            .emit(Operation::upsert(
                "events",
                row! { "zeta" => 1, "alpha" => "x", "mid" => true },
            ))
            .unwrap();

        // Registration order is the row's key order, not insertion order
        let snapshot = emitter.registry().finalize();
        let names: Vec<&str> = snapshot
            .get_table("events")
            .unwrap()
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_type_conflicts_surface_at_emit() {
        let mut emitter = emitter_with_users();

        let err = emitter
            .emit(Operation::upsert("users", row! { "id" => 1, "name" => 2.5 }))
            .unwrap_err();
        assert!(matches!(
            err,
            EmitError::Schema(SchemaError::TypeConflict { column, .. }) if column == "name"
        ));
    }

    #[test]
    fn test_buffer_overflow() {
        let mut registry = SchemaRegistry::new();
        registry
            .declare_table(
                TableDecl::new("t")
                    .column("id", ColumnType::Integer)
                    .primary_key(["id"]),
            )
            .unwrap();
        let mut emitter = OperationEmitter::new(registry, 2);

        emitter.emit(Operation::upsert("t", row! { "id" => 1 })).unwrap();
        emitter.emit(Operation::upsert("t", row! { "id" => 2 })).unwrap();

        let err = emitter
            .emit(Operation::upsert("t", row! { "id" => 3 }))
            .unwrap_err();
        assert!(matches!(err, EmitError::BufferOverflow { capacity: 2 }));

        // Flushing makes room again
        emitter.flush();
        emitter.emit(Operation::upsert("t", row! { "id" => 3 })).unwrap();
    }

    #[test]
    fn test_truncate_ordering() {
        let mut emitter = emitter_with_users();

        // Truncate before any flush for the table is fine
        emitter.emit(Operation::truncate("users")).unwrap();
        emitter
            .emit(Operation::upsert("users", row! { "id" => 1, "name" => "a" }))
            .unwrap();
        emitter.flush();

        // After the table's operations were flushed, a truncate would
        // reorder behind transmitted data
        let err = emitter.emit(Operation::truncate("users")).unwrap_err();
        assert!(matches!(
            err,
            EmitError::OrderingViolation { table } if table == "users"
        ));
    }
}

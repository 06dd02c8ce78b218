//! Schema declaration, inference, and evolution.
//!
//! The [`SchemaRegistry`] is the per-run authority on table and column
//! definitions. It serves two connector styles behind one interface:
//!
//! - **Specified types**: the connector declares tables up front via
//!   [`SchemaRegistry::declare_table`], and emitted values are validated
//!   against the declaration.
//! - **Unspecified types**: the connector declares nothing; tables are
//!   registered implicitly and column types are inferred from the first
//!   non-null value observed via [`SchemaRegistry::ensure_column`].
//!
//! In both styles, a column's type may only widen along the lattice in
//! [`crate::types`], and only when the registry is configured for widening.
//! Primary-key columns never widen.
//!
//! Schema evolution across runs works by seeding a registry with the prior
//! run's [`SchemaSnapshot`] ([`SchemaRegistry::resume`]): the merged schema
//! may only grow columns or widen types relative to the prior run, never
//! narrow.

use crate::types::ColumnType;
use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Error Types
// ============================================================================

/// Error type for schema operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// Table re-declared with a conflicting primary key
    #[error("table '{0}' already declared with a conflicting primary key")]
    DuplicateTable(String),

    /// A listed primary-key column is absent from the declared columns
    #[error("primary-key column '{column}' is not declared in table '{table}'")]
    InvalidPrimaryKey { table: String, column: String },

    /// An observed or declared type is incompatible with the known type
    #[error(
        "type conflict in table '{table}', column '{column}': \
         declared {declared}, observed {observed}"
    )]
    TypeConflict {
        table: String,
        column: String,
        declared: ColumnType,
        observed: ColumnType,
    },

    /// Operation referenced a table the registry does not know
    #[error("table not found: {0}")]
    TableNotFound(String),
}

// ============================================================================
// Column and Table Definitions
// ============================================================================

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Column type, flattened into the column object as a `type` tag
    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether this column is nullable
    #[serde(default)]
    pub nullable: bool,
}

impl Column {
    /// Create a new non-nullable column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a new nullable column definition.
    pub fn nullable(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }
}

/// An explicit table declaration, built by connector `schema()` code.
///
/// # Example
///
/// ```rust
/// use sync_core::{ColumnType, TableDecl};
///
/// let users = TableDecl::new("users")
///     .column("id", ColumnType::Integer)
///     .column("name", ColumnType::String)
///     .primary_key(["id"]);
/// ```
#[derive(Debug, Clone)]
pub struct TableDecl {
    /// Table name
    pub name: String,

    /// Declared columns, in declaration order
    pub columns: Vec<Column>,

    /// Primary-key column names
    pub primary_key: Vec<String>,
}

impl TableDecl {
    /// Start a declaration for the named table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add a non-nullable column.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    /// Add a nullable column.
    pub fn nullable_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::nullable(name, column_type));
        self
    }

    /// Set the primary-key column names.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// A registered table inside the registry.
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name
    pub name: String,

    /// Known columns, in registration order
    columns: Vec<Column>,

    /// Primary-key column names (empty for implicitly registered tables)
    primary_key: Vec<String>,

    /// Cached column lookup
    column_map: HashMap<String, usize>,
}

impl Table {
    fn new(name: String, columns: Vec<Column>, primary_key: Vec<String>) -> Self {
        let column_map = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.name.clone(), idx))
            .collect();
        Self {
            name,
            columns,
            primary_key,
            column_map,
        }
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.column_map.get(name).and_then(|&idx| self.columns.get(idx))
    }

    /// All known columns, in registration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Primary-key column names.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Whether this table has a primary key.
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Whether the named column is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    fn add_column(&mut self, column: Column) {
        let idx = self.columns.len();
        self.column_map.insert(column.name.clone(), idx);
        self.columns.push(column);
    }
}

// ============================================================================
// Schema Snapshot
// ============================================================================

/// Immutable snapshot of one table's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,

    /// Columns, in registration order
    pub columns: Vec<Column>,

    /// Primary-key column names
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Immutable snapshot of the full schema, produced by
/// [`SchemaRegistry::finalize`] and announced to the destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Table schemas
    pub tables: Vec<TableSchema>,

    /// Cached table lookup (not serialized)
    #[serde(skip)]
    table_map: HashMap<String, usize>,
}

impl SchemaSnapshot {
    /// Create a snapshot from a list of table schemas.
    pub fn new(tables: Vec<TableSchema>) -> Self {
        let table_map = tables
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.clone(), idx))
            .collect();
        Self { tables, table_map }
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        // Fall back to a scan when the map was skipped by deserialization
        self.table_map
            .get(name)
            .and_then(|&idx| self.tables.get(idx))
            .or_else(|| self.tables.iter().find(|t| t.name == name))
    }

    /// All table names in the snapshot.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Whether the snapshot contains no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ============================================================================
// Schema Registry
// ============================================================================

/// Per-run schema authority: explicit declarations, type inference, and
/// evolution validation. Exclusively owned by one sync run.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: Vec<Table>,
    table_map: HashMap<String, usize>,
    widen_types: bool,
    dirty: bool,
}

impl SchemaRegistry {
    /// Create an empty registry with inference widening disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable inference widening (integer -> float -> decimal -> string).
    ///
    /// With widening disabled, a value whose kind does not fit the known
    /// column type is a [`SchemaError::TypeConflict`].
    pub fn with_widening(mut self) -> Self {
        self.widen_types = true;
        self
    }

    /// Seed a registry with the prior run's snapshot.
    ///
    /// All evolution rules then apply relative to the prior schema: the
    /// column set may only grow, types may only widen, primary keys may
    /// not change.
    pub fn resume(snapshot: SchemaSnapshot) -> Self {
        let mut registry = Self::new();
        for table in snapshot.tables {
            registry.insert_table(Table::new(table.name, table.columns, table.primary_key));
        }
        // Seeding is not a schema change; nothing to re-announce yet
        registry.dirty = false;
        registry
    }

    /// Whether the schema changed since the last [`Self::mark_announced`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record that the current schema has been announced downstream.
    pub fn mark_announced(&mut self) {
        self.dirty = false;
    }

    /// Get a registered table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.table_map.get(name).and_then(|&idx| self.tables.get(idx))
    }

    /// Whether the named table is known to the registry.
    pub fn contains(&self, name: &str) -> bool {
        self.table_map.contains_key(name)
    }

    /// Explicitly declare a table, or merge into an existing declaration.
    ///
    /// Re-declaring is legal as long as the primary key is unchanged and
    /// every re-declared column keeps its type or widens it. New columns
    /// are appended. An implicitly registered table (inference mode) may
    /// adopt a primary key through its first explicit declaration.
    pub fn declare_table(&mut self, decl: TableDecl) -> Result<(), SchemaError> {
        // Primary-key columns must exist among the declared columns
        for key in &decl.primary_key {
            if !decl.columns.iter().any(|c| &c.name == key) {
                return Err(SchemaError::InvalidPrimaryKey {
                    table: decl.name,
                    column: key.clone(),
                });
            }
        }

        let Some(&idx) = self.table_map.get(&decl.name) else {
            self.insert_table(Table::new(decl.name, decl.columns, decl.primary_key));
            self.dirty = true;
            return Ok(());
        };

        let existing = &self.tables[idx];
        if existing.has_primary_key() && key_set(&existing.primary_key) != key_set(&decl.primary_key)
        {
            return Err(SchemaError::DuplicateTable(decl.name));
        }

        // Validate the column merge before mutating anything. Widening is
        // legal except on primary-key columns, whose type is fixed for the
        // table's lifetime.
        let effective_key = if decl.primary_key.is_empty() {
            existing.primary_key()
        } else {
            decl.primary_key.as_slice()
        };
        for col in &decl.columns {
            if let Some(known) = existing.get_column(&col.name) {
                let key_column = effective_key.iter().any(|k| k == &col.name);
                if (key_column && known.column_type != col.column_type)
                    || !known.column_type.widens_to(&col.column_type)
                {
                    return Err(SchemaError::TypeConflict {
                        table: decl.name.clone(),
                        column: col.name.clone(),
                        declared: known.column_type,
                        observed: col.column_type,
                    });
                }
            }
        }

        let table = &mut self.tables[idx];
        if !decl.primary_key.is_empty() {
            table.primary_key = decl.primary_key;
        }
        for col in decl.columns {
            match table.column_map.get(&col.name).copied() {
                Some(col_idx) => {
                    let known = &mut table.columns[col_idx];
                    if known.column_type != col.column_type {
                        known.column_type = col.column_type;
                        self.dirty = true;
                    }
                    if col.nullable && !known.nullable {
                        known.nullable = true;
                        self.dirty = true;
                    }
                }
                None => {
                    table.add_column(col);
                    self.dirty = true;
                }
            }
        }

        Ok(())
    }

    /// Register a table implicitly, without columns or a primary key.
    ///
    /// Used by the emitter for upserts against undeclared tables in
    /// inference mode. A no-op when the table already exists.
    pub fn ensure_table(&mut self, name: &str) {
        if !self.contains(name) {
            self.insert_table(Table::new(name.to_string(), Vec::new(), Vec::new()));
            self.dirty = true;
        }
    }

    /// Validate an observed value against a column, inferring or widening
    /// the column type as needed.
    ///
    /// Unknown columns are registered nullable with the value's inferred
    /// type. A null on an unknown column registers nothing and returns
    /// `Ok(None)`; the column is typed at its first non-null sighting.
    /// Known columns validate compatibility, widening along the lattice
    /// when widening is enabled. Primary-key columns never widen.
    pub fn ensure_column(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Option<ColumnType>, SchemaError> {
        let &idx = self
            .table_map
            .get(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;
        let entry = &mut self.tables[idx];

        let Some(known) = entry.get_column(column) else {
            let Some(kind) = value.kind() else {
                return Ok(None);
            };
            entry.add_column(Column::nullable(column, kind));
            self.dirty = true;
            return Ok(Some(kind));
        };
        let declared = known.column_type;

        let Some(observed) = value.kind() else {
            return Ok(Some(declared));
        };

        if observed.widens_to(&declared) {
            return Ok(Some(declared));
        }

        if self.widen_types && declared.widens_to(&observed) && !entry.is_primary_key(column) {
            let col_idx = entry.column_map[column];
            entry.columns[col_idx].column_type = observed;
            self.dirty = true;
            return Ok(Some(observed));
        }

        Err(SchemaError::TypeConflict {
            table: table.to_string(),
            column: column.to_string(),
            declared,
            observed,
        })
    }

    /// Produce an immutable snapshot of the current schema.
    pub fn finalize(&self) -> SchemaSnapshot {
        SchemaSnapshot::new(
            self.tables
                .iter()
                .map(|t| TableSchema {
                    name: t.name.clone(),
                    columns: t.columns.clone(),
                    primary_key: t.primary_key.clone(),
                })
                .collect(),
        )
    }

    fn insert_table(&mut self, table: Table) {
        let idx = self.tables.len();
        self.table_map.insert(table.name.clone(), idx);
        self.tables.push(table);
    }
}

fn key_set(keys: &[String]) -> BTreeSet<&str> {
    keys.iter().map(String::as_str).collect()
}

// ============================================================================
// Tests
// ============================================================================

//! Change operations and flushed batches.

use std::collections::BTreeMap;
use sync_core::Value;

/// Column name to value mapping for one row.
///
/// Ordered by column name, so schema inference and primary-key rendering
/// see columns deterministically regardless of construction order.
pub type Row = BTreeMap<String, Value>;

/// A single change operation emitted by connector code.
///
/// Upsert and Update carry a full column/value mapping; Delete carries a
/// mapping restricted to (at least) the primary-key columns; Truncate
/// carries only the table reference.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert-or-replace a row identified by primary key
    Upsert {
        /// Destination table name
        table: String,
        /// Column values, including the primary key
        row: Row,
    },

    /// Replace the non-key columns of a row identified by primary key
    Update {
        /// Destination table name
        table: String,
        /// Column values, including the primary key
        row: Row,
    },

    /// Remove a row identified by primary key
    Delete {
        /// Destination table name
        table: String,
        /// Primary-key column values
        key: Row,
    },

    /// Remove all previously delivered rows of a table
    Truncate {
        /// Destination table name
        table: String,
    },
}

impl Operation {
    /// Build an upsert operation.
    pub fn upsert(table: impl Into<String>, row: Row) -> Self {
        Operation::Upsert {
            table: table.into(),
            row,
        }
    }

    /// Build an update operation.
    pub fn update(table: impl Into<String>, row: Row) -> Self {
        Operation::Update {
            table: table.into(),
            row,
        }
    }

    /// Build a delete operation.
    pub fn delete(table: impl Into<String>, key: Row) -> Self {
        Operation::Delete {
            table: table.into(),
            key,
        }
    }

    /// Build a truncate operation.
    pub fn truncate(table: impl Into<String>) -> Self {
        Operation::Truncate {
            table: table.into(),
        }
    }

    /// The table this operation targets.
    pub fn table(&self) -> &str {
        match self {
            Operation::Upsert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Truncate { table } => table,
        }
    }

    /// Operation kind for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Upsert { .. } => "upsert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Truncate { .. } => "truncate",
        }
    }
}

/// An immutable, ordered group of operations flushed together.
///
/// Operations appear in exact emission order, across all tables. Batches
/// are numbered sequentially within a run; the destination acknowledges a
/// batch wholesale or not at all.
#[derive(Debug)]
pub struct Batch {
    sequence: u64,
    operations: Vec<Operation>,
}

impl Batch {
    pub(crate) fn new(sequence: u64, operations: Vec<Operation>) -> Self {
        Self {
            sequence,
            operations,
        }
    }

    /// Batch sequence number within the run, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The operations, in emission order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Convenience macro for building a [`Row`] literal.
///
/// ```rust
/// use connector_sync::row;
///
/// let r = row! { "id" => 1, "name" => "ada" };
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    ( $( $key:expr => $value:expr ),* $(,)? ) => {{
        let mut row = $crate::Row::new();
        $( row.insert($key.to_string(), $crate::Value::from($value)); )*
        row
    }};
}

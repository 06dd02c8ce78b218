//! Core types for the connector-sync protocol.
//!
//! This crate provides the foundational types used across the sync
//! framework, including:
//!
//! - [`ColumnType`] - Closed type universe for destination columns
//! - [`Value`] - Runtime values carried by emitted operations
//! - [`SchemaRegistry`] - Per-run schema declaration, inference, and evolution
//! - [`SchemaSnapshot`] - Immutable schema announced to the destination
//!
//! # Architecture
//!
//! sync-core sits at the foundation of the framework and performs no I/O:
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint       (resumable cursor state per namespace)
//!    │
//!    └─── connector-sync   (operation emitter, sync driver, transport)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{ColumnType, SchemaRegistry, TableDecl, Value};
//!
//! let mut registry = SchemaRegistry::new();
//! registry.declare_table(
//!     TableDecl::new("users")
//!         .column("id", ColumnType::Integer)
//!         .column("name", ColumnType::String)
//!         .primary_key(["id"]),
//! )?;
//!
//! // Values validate against the declaration
//! let kind = registry.ensure_column("users", "name", &Value::from("ada"))?;
//! assert_eq!(kind, Some(ColumnType::String));
//! # Ok::<(), sync_core::SchemaError>(())
//! ```

pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use schema::{
    Column, SchemaError, SchemaRegistry, SchemaSnapshot, Table, TableDecl, TableSchema,
};
pub use types::ColumnType;
pub use values::Value;

//! Connector synchronization framework with at-least-once delivery over
//! idempotent destinations.
//!
//! A sync run moves rows from a source system to a destination through
//! four cooperating pieces:
//!
//! - **Schema registry** ([`SchemaRegistry`], in `sync-core`): tracks
//!   declared and inferred table schemas, validates rows against them,
//!   and optionally widens column types along a fixed lattice.
//! - **Operation emitter** ([`OperationEmitter`]): validates upserts,
//!   updates, deletes and truncates against the registry and buffers them
//!   into ordered batches.
//! - **Checkpoint store** ([`CheckpointStore`], in `checkpoint`): durably
//!   persists the connector's cursor state, guarded by monotonic commit
//!   sequence numbers and per-namespace locks.
//! - **Sync driver** ([`SyncDriver`]): runs a [`Connector`] against a
//!   [`DestinationTransport`], flushing buffered batches and committing
//!   checkpoints in transmit-then-checkpoint order.
//!
//! Delivery is exactly-once-equivalent: a batch is always transmitted
//! before the checkpoint that covers it is committed, so a crash in the
//! window between the two replays the batch on the next run, and the
//! destination's idempotent per-primary-key application converges to the
//! same state.
//!
//! ```
//! use connector_sync::{
//!     Checkpoint, Connector, Configuration, MemoryStore, SyncContext, SyncDriver, TableDecl,
//!     ColumnType, SchemaError,
//! };
//! use connector_sync::testing::MemoryDestination;
//! use connector_sync::row;
//! use std::sync::Arc;
//!
//! struct Users;
//!
//! #[async_trait::async_trait]
//! impl Connector for Users {
//!     fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
//!         Ok(vec![TableDecl::new("users")
//!             .column("id", ColumnType::Integer)
//!             .column("name", ColumnType::String)
//!             .primary_key(["id"])])
//!     }
//!
//!     async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
//!         ctx.upsert("users", row! { "id" => 1, "name" => "ada" }).await?;
//!         let mut state = Checkpoint::new();
//!         state.set("cursor", 1);
//!         ctx.checkpoint(state).await?;
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let driver = SyncDriver::new(Arc::new(MemoryStore::new()));
//! let mut destination = MemoryDestination::new();
//! let report = driver
//!     .run("users-prod", &Configuration::new(), None, &mut Users, &mut destination)
//!     .await;
//! assert!(report.is_success());
//! # });
//! ```

pub mod connector;
pub mod driver;
pub mod emitter;
pub mod operation;
pub mod testing;
pub mod transport;

pub use connector::{Configuration, Connector};
pub use driver::{
    DriverConfig, RetryPolicy, RunReport, RunState, SyncContext, SyncDriver, SyncError,
    SyncErrorKind,
};
pub use emitter::{EmitError, OperationEmitter};
pub use operation::{Batch, Operation, Row};
pub use transport::{DestinationTransport, TransportError};

// Core schema and value types
pub use sync_core::{
    Column, ColumnType, SchemaError, SchemaRegistry, SchemaSnapshot, Table, TableDecl,
    TableSchema, Value,
};

// Checkpoint persistence
pub use checkpoint::{
    Checkpoint, CheckpointSession, CheckpointStore, CursorValue, FilesystemStore, MemoryStore,
    NamespaceLocks, StoreError, StoredCheckpoint,
};

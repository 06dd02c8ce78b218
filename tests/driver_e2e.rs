//! End-to-end driver runs against the in-memory destination.

use std::sync::Arc;

use connector_sync::testing::MemoryDestination;
use connector_sync::{
    row, Batch, Checkpoint, ColumnType, Configuration, Connector, DestinationTransport,
    DriverConfig, MemoryStore, RunState, SchemaError, SchemaSnapshot, SyncContext, SyncDriver,
    TableDecl, TransportError,
};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("connector_sync=debug")
        .try_init()
        .ok();
}

fn users_decl() -> TableDecl {
    TableDecl::new("users")
        .column("id", ColumnType::Integer)
        .column("name", ColumnType::String)
        .primary_key(["id"])
}

/// Emits a fixed list of (id, name) upserts and checkpoints once at the end.
struct UsersConnector {
    rows: Vec<(i64, &'static str)>,
}

#[async_trait::async_trait]
impl Connector for UsersConnector {
    fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        Ok(vec![users_decl()])
    }

    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        for (id, name) in &self.rows {
            ctx.upsert("users", row! { "id" => *id, "name" => *name })
                .await?;
        }
        let mut state = Checkpoint::new();
        state.set("cursor", self.rows.len() as i64);
        ctx.checkpoint(state).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_upsert_same_key_converges_to_last_write() {
    init_logging();

    let driver = SyncDriver::new(Arc::new(MemoryStore::new()));
    let mut destination = MemoryDestination::new();
    let mut connector = UsersConnector {
        rows: vec![(1, "a"), (1, "b")],
    };

    let report = driver
        .run(
            "users-e2e",
            &Configuration::new(),
            None,
            &mut connector,
            &mut destination,
        )
        .await;

    assert!(report.is_success(), "run failed: {:?}", report.error);
    assert_eq!(report.batches, 1);
    assert_eq!(report.operations, 2);
    assert_eq!(report.checkpoints, 1);

    assert_eq!(destination.row_count("users"), 1);
    let key = row! { "id" => 1 };
    let stored = destination.get_row("users", &key).unwrap();
    assert_eq!(stored.get("name").unwrap().as_str(), Some("b"));
}

/// Applying the same rows a second time leaves the destination unchanged.
#[tokio::test]
async fn test_replayed_rows_are_idempotent() {
    init_logging();

    let store = Arc::new(MemoryStore::new());
    let driver = SyncDriver::new(store);
    let mut destination = MemoryDestination::new();
    let mut connector = UsersConnector {
        rows: vec![(1, "a"), (2, "b")],
    };

    let first = driver
        .run(
            "replay-e2e",
            &Configuration::new(),
            None,
            &mut connector,
            &mut destination,
        )
        .await;
    assert!(first.is_success());
    assert_eq!(destination.row_count("users"), 2);

    let second = driver
        .run(
            "replay-e2e",
            &Configuration::new(),
            first.schema.clone(),
            &mut connector,
            &mut destination,
        )
        .await;
    assert!(second.is_success());

    // Resumed from the first run's checkpoint
    let resumed = second.last_committed.as_ref().unwrap();
    assert_eq!(resumed.get_i64("cursor"), Some(2));

    assert_eq!(destination.row_count("users"), 2);
    assert_eq!(destination.batches_applied(), 2);
}

/// Records the exact order operations arrive in.
#[derive(Default)]
struct RecordingDestination {
    log: Vec<String>,
    sequences: Vec<u64>,
}

#[async_trait::async_trait]
impl DestinationTransport for RecordingDestination {
    async fn announce_schema(&mut self, _schema: &SchemaSnapshot) -> Result<(), TransportError> {
        Ok(())
    }

    async fn apply_batch(&mut self, batch: &Batch) -> Result<(), TransportError> {
        self.sequences.push(batch.sequence());
        for op in batch {
            self.log.push(format!("{}:{}", op.kind(), op.table()));
        }
        Ok(())
    }
}

struct InterleavedConnector;

#[async_trait::async_trait]
impl Connector for InterleavedConnector {
    fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        Ok(vec![
            users_decl(),
            TableDecl::new("orders")
                .column("id", ColumnType::Integer)
                .column("total", ColumnType::Float)
                .primary_key(["id"]),
        ])
    }

    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        ctx.upsert("users", row! { "id" => 1, "name" => "ada" })
            .await?;
        ctx.upsert("orders", row! { "id" => 10, "total" => 9.5 })
            .await?;
        ctx.delete("users", row! { "id" => 1 }).await?;
        ctx.upsert("orders", row! { "id" => 11, "total" => 1.25 })
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_flush_preserves_emission_order_across_tables() {
    init_logging();

    let driver = SyncDriver::new(Arc::new(MemoryStore::new()));
    let mut destination = RecordingDestination::default();

    let report = driver
        .run(
            "order-e2e",
            &Configuration::new(),
            None,
            &mut InterleavedConnector,
            &mut destination,
        )
        .await;

    assert!(report.is_success(), "run failed: {:?}", report.error);
    assert_eq!(
        destination.log,
        vec![
            "upsert:users",
            "upsert:orders",
            "delete:users",
            "upsert:orders",
        ]
    );
    assert_eq!(destination.sequences, vec![1]);
}

struct ThreeUpserts;

#[async_trait::async_trait]
impl Connector for ThreeUpserts {
    fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        Ok(vec![users_decl()])
    }

    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        for id in 1..=3i64 {
            ctx.upsert("users", row! { "id" => id, "name" => "x" })
                .await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_flush_threshold_triggers_interim_flush() {
    init_logging();

    let config = DriverConfig {
        flush_threshold: 2,
        ..DriverConfig::default()
    };
    let driver = SyncDriver::new(Arc::new(MemoryStore::new())).with_config(config);
    let mut destination = RecordingDestination::default();

    let report = driver
        .run(
            "threshold-e2e",
            &Configuration::new(),
            None,
            &mut ThreeUpserts,
            &mut destination,
        )
        .await;

    assert!(report.is_success());
    // 2 operations flush at the threshold, the trailing 1 at run end
    assert_eq!(report.batches, 2);
    assert_eq!(report.operations, 3);
    assert_eq!(destination.sequences, vec![1, 2]);
    // No checkpoint was committed, so the next run starts from scratch
    assert_eq!(report.checkpoints, 0);
    assert!(report.last_committed.is_none());
}

/// Full reload: drop everything delivered by earlier runs, then resync.
struct TruncateAndReload;

#[async_trait::async_trait]
impl Connector for TruncateAndReload {
    fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        Ok(vec![users_decl()])
    }

    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        ctx.truncate("users").await?;
        ctx.upsert("users", row! { "id" => 3, "name" => "new" })
            .await?;
        ctx.checkpoint(Checkpoint::new()).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_truncate_drops_previously_delivered_rows() {
    init_logging();

    let store = Arc::new(MemoryStore::new());
    let driver = SyncDriver::new(store);
    let mut destination = MemoryDestination::new();

    let mut seed = UsersConnector {
        rows: vec![(1, "old"), (2, "old")],
    };
    let first = driver
        .run(
            "truncate-e2e",
            &Configuration::new(),
            None,
            &mut seed,
            &mut destination,
        )
        .await;
    assert!(first.is_success());
    assert_eq!(destination.row_count("users"), 2);

    let second = driver
        .run(
            "truncate-e2e",
            &Configuration::new(),
            first.schema.clone(),
            &mut TruncateAndReload,
            &mut destination,
        )
        .await;
    assert!(second.is_success(), "run failed: {:?}", second.error);

    assert_eq!(destination.row_count("users"), 1);
    let rows = destination.rows("users");
    assert_eq!(rows[0].get("name").unwrap().as_str(), Some("new"));
}

/// Reordering a truncate after already-flushed rows for the table is
/// rejected; the connector sees the validation error and can stop.
struct LateTruncate;

#[async_trait::async_trait]
impl Connector for LateTruncate {
    fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        Ok(vec![users_decl()])
    }

    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        ctx.upsert("users", row! { "id" => 1, "name" => "a" })
            .await?;
        ctx.checkpoint(Checkpoint::new()).await?;
        ctx.truncate("users").await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_truncate_after_flush_is_rejected() {
    init_logging();

    let driver = SyncDriver::new(Arc::new(MemoryStore::new()));
    let mut destination = MemoryDestination::new();

    let report = driver
        .run(
            "late-truncate-e2e",
            &Configuration::new(),
            None,
            &mut LateTruncate,
            &mut destination,
        )
        .await;

    assert_eq!(report.state, RunState::Failed);
    let err = report.error.as_ref().unwrap();
    assert!(matches!(
        err.emit_error(),
        Some(connector_sync::EmitError::OrderingViolation { table }) if table == "users"
    ));
    // The flushed row and its checkpoint survived the late failure
    assert_eq!(destination.row_count("users"), 1);
    assert!(report.last_committed.is_some());
}

/// No schema() override: tables and columns come from inference.
struct InferredEvents;

#[async_trait::async_trait]
impl Connector for InferredEvents {
    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
        ctx.upsert("events", row! { "kind" => "click", "count" => 3 })
            .await?;
        ctx.upsert("events", row! { "kind" => "view", "count" => 7 })
            .await?;
        ctx.checkpoint(Checkpoint::new()).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_inference_registers_table_from_observed_rows() {
    init_logging();

    let driver = SyncDriver::new(Arc::new(MemoryStore::new()));
    let mut destination = MemoryDestination::new();

    let report = driver
        .run(
            "inference-e2e",
            &Configuration::new(),
            None,
            &mut InferredEvents,
            &mut destination,
        )
        .await;

    assert!(report.is_success(), "run failed: {:?}", report.error);

    let schema = report.schema.as_ref().unwrap();
    let events = schema.get_table("events").unwrap();
    assert!(events.primary_key.is_empty());
    let kind = events.columns.iter().find(|c| c.name == "kind").unwrap();
    assert_eq!(kind.column_type, ColumnType::String);
    let count = events.columns.iter().find(|c| c.name == "count").unwrap();
    assert_eq!(count.column_type, ColumnType::Integer);

    // Without a primary key the destination appends
    assert_eq!(destination.row_count("events"), 2);
}

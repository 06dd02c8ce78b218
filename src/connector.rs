//! Connector entry point.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::driver::SyncContext;
use sync_core::{SchemaError, TableDecl};

/// Configuration mapping supplied by the host's configuration/secrets
/// provider. The core never persists its contents.
pub type Configuration = HashMap<String, String>;

/// A connector implementation, invoked by the sync driver once per run.
///
/// Connector code is sequential and cooperative: it runs on one logical
/// thread of control and drives the run through the [`SyncContext`] it is
/// handed, emitting operations and checkpointing at logical boundaries.
///
/// # Example
///
/// ```rust,ignore
/// struct HelloConnector;
///
/// #[async_trait]
/// impl Connector for HelloConnector {
///     fn schema(&self, _config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
///         Ok(vec![TableDecl::new("hello_world")
///             .column("id", ColumnType::Integer)
///             .column("message", ColumnType::String)
///             .primary_key(["id"])])
///     }
///
///     async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()> {
///         let cursor = ctx.state().and_then(|s| s.get_i64("cursor")).unwrap_or(0);
///         ctx.upsert("hello_world", row! { "id" => cursor, "message" => "hi" })
///             .await?;
///
///         let mut state = Checkpoint::new();
///         state.set("cursor", cursor + 1);
///         ctx.checkpoint(state).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send {
    /// Declare the tables this connector delivers.
    ///
    /// Optional: the default declares nothing, putting the run in pure
    /// inference mode where column types are derived from emitted values.
    fn schema(&self, config: &Configuration) -> Result<Vec<TableDecl>, SchemaError> {
        let _ = config;
        Ok(Vec::new())
    }

    /// Produce this run's changes.
    ///
    /// Called once per run with a context carrying the configuration and
    /// the prior run's checkpoint. Schema and emit errors surface
    /// synchronously from the context calls and are recoverable locally
    /// (a connector may skip a malformed row and continue); returning an
    /// error fails the run.
    async fn update(&mut self, ctx: &mut SyncContext<'_>) -> anyhow::Result<()>;
}

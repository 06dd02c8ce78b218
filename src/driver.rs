//! Sync driver state machine.
//!
//! One [`SyncDriver::run`] call executes one sync run:
//!
//! ```text
//! Started ──▸ Running ──▸ Flushing ──▸ Checkpointed ──▸ Completed
//!                ▲            │              │
//!                └────────────┴──────────────┘
//!         (Failed is reachable from any non-terminal state)
//! ```
//!
//! - `Started` loads the prior checkpoint, builds the run's schema
//!   registry and operation emitter, and announces declared schema.
//! - `Running` executes connector code, which emits operations through
//!   the [`SyncContext`]. Crossing the flush threshold triggers an
//!   interim `Flushing` step without ending the run.
//! - `Flushing` drains the emitter and transmits the batch, retrying
//!   retryable transport failures with bounded exponential backoff.
//! - `Checkpointed` is reached after a connector-supplied checkpoint has
//!   been staged and durably committed, strictly after the covering batch
//!   was acknowledged. That ordering is the at-least-once guarantee: a
//!   crash between transmit and commit re-emits from the prior
//!   checkpoint, and idempotent destination apply makes that safe.
//!
//! A `Failed` run never commits a checkpoint for data that was not
//! confirmed transmitted; its report carries the last successfully
//! committed checkpoint so the next invocation resumes cleanly.

use std::sync::Arc;
use std::time::Duration;

use checkpoint::{Checkpoint, CheckpointSession, CheckpointStore, NamespaceLocks, StoreError};
use uuid::Uuid;

use crate::connector::{Configuration, Connector};
use crate::emitter::{EmitError, OperationEmitter};
use crate::operation::{Batch, Operation, Row};
use crate::transport::{DestinationTransport, TransportError};
use sync_core::{SchemaError, SchemaRegistry, SchemaSnapshot};

// ============================================================================
// Run lifecycle
// ============================================================================

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Checkpoint loaded, registry and emitter under construction
    Started,
    /// Connector code executing
    Running,
    /// Draining the emitter and transmitting a batch
    Flushing,
    /// Checkpoint durably committed
    Checkpointed,
    /// Run finished; all emitted data acknowledged
    Completed,
    /// Run aborted; durable progress ends at the last committed checkpoint
    Failed,
}

impl RunState {
    /// String form for logs and file-friendly output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Running => "running",
            RunState::Flushing => "flushing",
            RunState::Checkpointed => "checkpointed",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    /// Whether the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// What went wrong, across the protocol's error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncErrorKind {
    /// Schema declaration or validation failure
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Operation validation or buffering failure
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// Destination transmission failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Checkpoint storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error returned by connector code itself
    #[error("connector error: {0}")]
    Connector(Arc<anyhow::Error>),
}

/// Structured error describing the failing stage of a run.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sync run failed during {stage}: {kind}")]
pub struct SyncError {
    /// The lifecycle state in which the failure occurred
    pub stage: RunState,
    /// The underlying failure
    #[source]
    pub kind: SyncErrorKind,
}

impl SyncError {
    pub(crate) fn new(stage: RunState, kind: SyncErrorKind) -> Self {
        Self { stage, kind }
    }

    /// The emit error inside, if this is a locally recoverable validation
    /// failure a connector may catch and adapt to.
    pub fn emit_error(&self) -> Option<&EmitError> {
        match &self.kind {
            SyncErrorKind::Emit(err) => Some(err),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Retry policy for retryable transmission and commit failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before escalating to `Failed`
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound on the per-attempt delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Driver policy knobs.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Buffered operations that trigger an interim flush
    pub flush_threshold: usize,
    /// Hard cap on the emitter buffer; exceeding it without a flush is
    /// `BufferOverflow`
    pub buffer_capacity: usize,
    /// Retry policy for retryable transport and persist failures
    pub retry: RetryPolicy,
    /// Whether inference may widen column types along the lattice
    pub widen_types: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 1000,
            buffer_capacity: 4000,
            retry: RetryPolicy::default(),
            widen_types: true,
        }
    }
}

// ============================================================================
// Run report
// ============================================================================

/// Outcome of one sync run.
#[derive(Debug)]
pub struct RunReport {
    /// Unique identifier of this run
    pub run_id: Uuid,
    /// Namespace the run synchronized
    pub namespace: String,
    /// Terminal state: `Completed` or `Failed`
    pub state: RunState,
    /// Batches acknowledged by the destination
    pub batches: u64,
    /// Operations acknowledged by the destination
    pub operations: u64,
    /// Checkpoints durably committed
    pub checkpoints: u64,
    /// The last durably committed checkpoint, which is where the next
    /// invocation resumes
    pub last_committed: Option<Checkpoint>,
    /// Final schema snapshot of the run
    pub schema: Option<SchemaSnapshot>,
    /// The failure, when `state` is `Failed`
    pub error: Option<SyncError>,
}

impl RunReport {
    /// Whether the run completed cleanly.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunStats {
    batches: u64,
    operations: u64,
    checkpoints: u64,
}

// ============================================================================
// Sync context
// ============================================================================

/// Per-run capability object handed to connector code.
///
/// All schema and emitter state lives behind this context; there is no
/// process-wide SDK state. Connector code is sequential with respect to
/// the context, and only the flush/checkpoint calls suspend.
pub struct SyncContext<'a> {
    config: &'a Configuration,
    state: Option<Checkpoint>,
    emitter: &'a mut OperationEmitter,
    transport: &'a mut dyn DestinationTransport,
    session: &'a mut CheckpointSession,
    retry: RetryPolicy,
    flush_threshold: usize,
    stage: RunState,
    stats: RunStats,
    failure: Option<SyncError>,
}

impl<'a> SyncContext<'a> {
    /// The configuration mapping supplied by the host.
    pub fn config(&self) -> &Configuration {
        self.config
    }

    /// The checkpoint to resume from: the prior run's committed value,
    /// or the most recent checkpoint committed in this run. `None` on a
    /// first-ever (full) sync.
    pub fn state(&self) -> Option<&Checkpoint> {
        self.state.as_ref()
    }

    /// Emit an upsert.
    pub async fn upsert(&mut self, table: impl Into<String>, row: Row) -> Result<(), SyncError> {
        self.emit(Operation::upsert(table, row)).await
    }

    /// Emit an update.
    pub async fn update(&mut self, table: impl Into<String>, row: Row) -> Result<(), SyncError> {
        self.emit(Operation::update(table, row)).await
    }

    /// Emit a delete, keyed by primary-key columns.
    pub async fn delete(&mut self, table: impl Into<String>, key: Row) -> Result<(), SyncError> {
        self.emit(Operation::delete(table, key)).await
    }

    /// Emit a truncate.
    pub async fn truncate(&mut self, table: impl Into<String>) -> Result<(), SyncError> {
        self.emit(Operation::truncate(table)).await
    }

    /// Emit an arbitrary operation.
    ///
    /// Validation failures ([`EmitError`] wrapped in the returned
    /// [`SyncError`]) are recoverable: the connector may skip the row and
    /// continue. Crossing the flush threshold triggers an interim flush
    /// and transmit; transport failures from that are not recoverable and
    /// poison the context.
    pub async fn emit(&mut self, operation: Operation) -> Result<(), SyncError> {
        self.check_failed()?;

        self.emitter
            .emit(operation)
            .map_err(|err| SyncError::new(RunState::Running, err.into()))?;

        if self.emitter.buffered() >= self.flush_threshold {
            tracing::debug!(
                buffered = self.emitter.buffered(),
                threshold = self.flush_threshold,
                "buffer crossed flush threshold; interim flush"
            );
            self.flush_and_transmit().await?;
        }
        Ok(())
    }

    /// Flush outstanding operations, transmit them, then stage and
    /// durably commit the given checkpoint.
    ///
    /// The checkpoint is committed only after the covering batch was
    /// acknowledged by the destination. On success, [`Self::state`]
    /// reflects the new checkpoint.
    pub async fn checkpoint(&mut self, state: Checkpoint) -> Result<(), SyncError> {
        self.check_failed()?;

        self.flush_and_transmit().await?;

        // Checkpointed is entered only on a durable commit; a failed
        // commit attempt is still part of the flushing step
        self.stage = RunState::Flushing;
        self.session.stage(state.clone());
        self.commit_with_retry().await?;
        self.stage = RunState::Running;

        self.state = Some(state);
        self.stats.checkpoints += 1;
        Ok(())
    }

    fn check_failed(&self) -> Result<(), SyncError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Record a failure at the run's current lifecycle state.
    fn fail(&mut self, kind: SyncErrorKind) -> SyncError {
        let err = SyncError::new(self.stage, kind);
        self.failure = Some(err.clone());
        err
    }

    /// Drain the buffer and transmit it as one batch, announcing the
    /// schema first when it changed since the last announcement. No-op on
    /// an empty buffer.
    async fn flush_and_transmit(&mut self) -> Result<(), SyncError> {
        if self.emitter.buffered() == 0 {
            return Ok(());
        }

        self.stage = RunState::Flushing;
        self.announce_if_changed().await?;

        let batch = self.emitter.flush();
        if let Err(err) = Self::apply_with_retry(&mut *self.transport, &self.retry, &batch).await {
            return Err(self.fail(err.into()));
        }

        self.stats.batches += 1;
        self.stats.operations += batch.len() as u64;
        tracing::info!(
            sequence = batch.sequence(),
            operations = batch.len(),
            "batch acknowledged by destination"
        );
        self.stage = RunState::Running;
        Ok(())
    }

    /// Announce the schema snapshot when it changed since the last
    /// announcement (declaration at start, or inference mid-run).
    async fn announce_if_changed(&mut self) -> Result<(), SyncError> {
        if !self.emitter.registry().is_dirty() {
            return Ok(());
        }

        let snapshot = self.emitter.registry().finalize();
        let mut attempt = 1u32;
        loop {
            match self.transport.announce_schema(&snapshot).await {
                Ok(()) => break,
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "schema announcement failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(self.fail(err.into())),
            }
        }

        self.emitter.registry_mut().mark_announced();
        Ok(())
    }

    async fn apply_with_retry(
        transport: &mut dyn DestinationTransport,
        retry: &RetryPolicy,
        batch: &Batch,
    ) -> Result<(), TransportError> {
        let mut attempt = 1u32;
        loop {
            match transport.apply_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        sequence = batch.sequence(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch transmission failed; retrying wholesale"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Commit the staged checkpoint, retrying `PersistError` with the
    /// same staged value. Other store errors are not retryable.
    async fn commit_with_retry(&mut self) -> Result<(), SyncError> {
        let mut attempt = 1u32;
        loop {
            match self.session.commit().await {
                Ok(()) => return Ok(()),
                Err(err @ StoreError::PersistError(_)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "checkpoint commit failed; retrying with same staged value"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(self.fail(err.into())),
            }
        }
    }
}

// ============================================================================
// Sync driver
// ============================================================================

/// Orchestrates sync runs against a checkpoint store.
///
/// One driver may run many namespaces, concurrently or sequentially; the
/// shared [`NamespaceLocks`] registry guarantees at-most-one in-flight
/// committer per namespace. The schema registry and operation emitter are
/// constructed fresh per run and never shared.
pub struct SyncDriver {
    config: DriverConfig,
    store: Arc<dyn CheckpointStore>,
    locks: NamespaceLocks,
}

impl SyncDriver {
    /// Create a driver over a checkpoint store with default policy.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            config: DriverConfig::default(),
            store,
            locks: NamespaceLocks::new(),
        }
    }

    /// Replace the driver policy.
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a namespace-lock registry across drivers in one host.
    pub fn with_locks(mut self, locks: NamespaceLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Execute one sync run for a namespace.
    ///
    /// `prior_schema` seeds the run's registry with the previous run's
    /// snapshot so schema evolution rules apply across runs; pass `None`
    /// for a first run or when the host does not track schema history.
    pub async fn run(
        &self,
        namespace: &str,
        config: &Configuration,
        prior_schema: Option<SchemaSnapshot>,
        connector: &mut dyn Connector,
        transport: &mut dyn DestinationTransport,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, namespace, "starting sync run");

        let mut report = RunReport {
            run_id,
            namespace: namespace.to_string(),
            state: RunState::Started,
            batches: 0,
            operations: 0,
            checkpoints: 0,
            last_committed: None,
            schema: None,
            error: None,
        };

        // Started: load checkpoint, build registry and emitter
        let mut session =
            match CheckpointSession::open(self.store.clone(), self.locks.clone(), namespace).await {
                Ok(session) => session,
                Err(err) => {
                    return self.finish_failed(report, SyncError::new(RunState::Started, err.into()))
                }
            };
        report.last_committed = session.last_committed().cloned();

        let mut registry = match prior_schema {
            Some(snapshot) => SchemaRegistry::resume(snapshot),
            None => SchemaRegistry::new(),
        };
        if self.config.widen_types {
            registry = registry.with_widening();
        }

        match connector.schema(config) {
            Ok(decls) => {
                for decl in decls {
                    if let Err(err) = registry.declare_table(decl) {
                        return self
                            .finish_failed(report, SyncError::new(RunState::Started, err.into()));
                    }
                }
            }
            Err(err) => {
                return self.finish_failed(report, SyncError::new(RunState::Started, err.into()))
            }
        }

        let mut emitter = OperationEmitter::new(registry, self.config.buffer_capacity);

        let mut ctx = SyncContext {
            config,
            state: session.last_committed().cloned(),
            emitter: &mut emitter,
            transport,
            session: &mut session,
            retry: self.config.retry.clone(),
            flush_threshold: self.config.flush_threshold,
            stage: RunState::Started,
            stats: RunStats::default(),
            failure: None,
        };

        // Announce explicitly declared schema before connector code runs
        let announced = ctx.announce_if_changed().await;

        // Running: connector drives the run through the context
        let outcome: Result<(), SyncError> = match announced {
            Err(err) => Err(err),
            Ok(()) => {
                ctx.stage = RunState::Running;
                match connector.update(&mut ctx).await {
                    Ok(()) => match ctx.failure.clone() {
                        // The connector swallowed a transport/store failure;
                        // the run still failed
                        Some(err) => Err(err),
                        // Final drain of whatever was emitted after the last
                        // checkpoint
                        None => ctx.flush_and_transmit().await,
                    },
                    Err(err) => match err.downcast::<SyncError>() {
                        Ok(sync_err) => Err(sync_err),
                        Err(other) => Err(SyncError::new(
                            RunState::Running,
                            SyncErrorKind::Connector(Arc::new(other)),
                        )),
                    },
                }
            }
        };

        let stats = ctx.stats;
        report.batches = stats.batches;
        report.operations = stats.operations;
        report.checkpoints = stats.checkpoints;
        report.last_committed = session.last_committed().cloned();
        report.schema = Some(emitter.registry().finalize());

        match outcome {
            Ok(()) => {
                report.state = RunState::Completed;
                tracing::info!(
                    %run_id,
                    namespace,
                    batches = report.batches,
                    operations = report.operations,
                    checkpoints = report.checkpoints,
                    "sync run completed"
                );
            }
            Err(err) => {
                report.state = RunState::Failed;
                tracing::error!(
                    %run_id,
                    namespace,
                    stage = %err.stage,
                    error = %err,
                    "sync run failed"
                );
                report.error = Some(err);
            }
        }
        report
    }

    fn finish_failed(&self, mut report: RunReport, err: SyncError) -> RunReport {
        report.state = RunState::Failed;
        tracing::error!(
            run_id = %report.run_id,
            namespace = %report.namespace,
            stage = %err.stage,
            error = %err,
            "sync run failed"
        );
        report.error = Some(err);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_bounded_exponential() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        // Capped at max_delay from here on
        assert_eq!(policy.delay(5), Duration::from_secs(1));
        assert_eq!(policy.delay(60), Duration::from_secs(1));
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Flushing.to_string(), "flushing");
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Checkpointed.is_terminal());
    }
}

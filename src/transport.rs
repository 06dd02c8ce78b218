//! Destination transport interface.
//!
//! The sync driver requires only an acknowledgment boundary from the
//! destination: a batch either succeeded, failed retryably, or failed
//! fatally. Transport details (wire protocol, authentication, batch
//! encoding) live entirely behind this trait.

use async_trait::async_trait;

use crate::operation::Batch;
use sync_core::SchemaSnapshot;

/// Error type for destination transmission.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Transient failure; the driver retries the same batch wholesale
    /// with bounded exponential backoff
    #[error("retryable transport failure: {0}")]
    Retryable(String),

    /// Permanent failure; the run transitions to Failed without retry
    #[error("fatal transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Whether the driver may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Retryable(_))
    }
}

/// Transport to the destination system.
///
/// The driver announces the schema once per schema change and transmits
/// batches in flush order. A batch must be applied atomically from the
/// driver's perspective: a timeout or partial write inside the transport
/// must surface as an error for the whole batch, never as a silent split.
///
/// Destination-side application is expected to be idempotent per primary
/// key, which is what makes at-least-once retransmission safe.
#[async_trait]
pub trait DestinationTransport: Send {
    /// Announce the current schema snapshot.
    async fn announce_schema(&mut self, schema: &SchemaSnapshot) -> Result<(), TransportError>;

    /// Transmit one batch; returns once the batch is durably acknowledged.
    async fn apply_batch(&mut self, batch: &Batch) -> Result<(), TransportError>;
}

//! Persistence sink — the projection writer.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::event::DomainEvent;

/// Idempotent writer of the `(x, y)`-keyed projection.
///
/// `upsert` must be safe to call any number of times with the same event:
/// the projection after two calls equals the projection after one. An
/// `ItemUpdated` is a full overwrite of the cell, not a delta. Backends keep
/// the `(block_number, log_index)` of the writing event and ignore events
/// that are not strictly newer, so redelivery and out-of-order workers never
/// regress a cell.
#[async_trait]
pub trait ProjectionSink: Send + Sync {
    async fn upsert(&self, event: &DomainEvent) -> Result<(), IndexerError>;
}

//! In-memory storage backend.
//!
//! Holds the tile projection and the checkpoint in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use tileindex_core::checkpoint::CheckpointStore;
use tileindex_core::error::IndexerError;
use tileindex_core::event::{DomainEvent, TileRow};
use tileindex_core::sink::ProjectionSink;

/// In-memory projection and checkpoint.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tiles: Mutex<BTreeMap<(u16, u16), TileRow>>,
    checkpoint: Mutex<Option<u64>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row at `(x, y)`, if any item was ever placed there.
    pub fn item_at(&self, x: u16, y: u16) -> Option<TileRow> {
        self.tiles.lock().unwrap().get(&(x, y)).cloned()
    }

    /// All rows, ordered by `(x, y)`.
    pub fn items(&self) -> Vec<TileRow> {
        self.tiles.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest block number over all rows.
    fn max_row_block(&self) -> Option<u64> {
        self.tiles
            .lock()
            .unwrap()
            .values()
            .map(|r| r.block_number)
            .max()
    }
}

#[async_trait]
impl ProjectionSink for InMemoryStorage {
    async fn upsert(&self, event: &DomainEvent) -> Result<(), IndexerError> {
        let mut tiles = self.tiles.lock().unwrap();
        let key = event.coordinate();
        if tiles.get(&key).is_some_and(|row| !row.is_superseded_by(event)) {
            tracing::debug!(x = key.0, y = key.1, block = event.block_number(), "stale event ignored");
            return Ok(());
        }
        tiles.insert(key, TileRow::from_event(event, chrono::Utc::now().timestamp()));
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn get(&self) -> Result<Option<u64>, IndexerError> {
        let explicit = *self.checkpoint.lock().unwrap();
        Ok(explicit.or_else(|| self.max_row_block()))
    }

    async fn set(&self, block_number: u64) -> Result<(), IndexerError> {
        *self.checkpoint.lock().unwrap() = Some(block_number);
        Ok(())
    }
}

//! Checkpoint manager — persists the highest fully processed block.
//!
//! The checkpoint is a single block number: every log at or below it has been
//! durably persisted. On restart the indexer resumes from `checkpoint + 1`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::IndexerError;

/// Trait for storing and loading the checkpoint.
///
/// Implementations include `MemoryCheckpointStore` here and the
/// `InMemoryStorage` / `PostgresStorage` backends in `tileindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last fully processed block, or `None` if nothing has been processed.
    ///
    /// Backends that also hold the projection fall back to the highest block
    /// number over all projection rows when no explicit checkpoint exists.
    async fn get(&self) -> Result<Option<u64>, IndexerError>;

    /// Durably record `block_number`. Success means it is safe to resume
    /// after this block.
    async fn set(&self, block_number: u64) -> Result<(), IndexerError>;
}

/// Monotonic writer over a [`CheckpointStore`].
///
/// Never writes a value lower than or equal to the last value it read or wrote.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    last: Option<u64>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store, last: None }
    }

    /// Read the stored checkpoint and remember it as the floor for writes.
    pub async fn load(&mut self) -> Result<Option<u64>, IndexerError> {
        let stored = self.store.get().await?;
        self.last = self.last.max(stored);
        Ok(self.last)
    }

    /// The last checkpoint seen by this manager, without touching the store.
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Write `block_number` if it is ahead of the last checkpoint.
    ///
    /// Returns `Ok(true)` if a write happened. On error the cached value is
    /// unchanged, so the next call retries the write.
    pub async fn advance(&mut self, block_number: u64) -> Result<bool, IndexerError> {
        if self.last.is_some_and(|last| last >= block_number) {
            return Ok(false);
        }
        self.store.set(block_number).await?;
        tracing::debug!(block = block_number, "checkpoint advanced");
        self.last = Some(block_number);
        Ok(true)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<u64>>,
    writes: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `block_number`.
    pub fn at(block_number: u64) -> Self {
        Self {
            value: Mutex::new(Some(block_number)),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every value passed to `set`, in order.
    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self) -> Result<Option<u64>, IndexerError> {
        Ok(*self.value.lock().unwrap())
    }

    async fn set(&self, block_number: u64) -> Result<(), IndexerError> {
        *self.value.lock().unwrap() = Some(block_number);
        self.writes.lock().unwrap().push(block_number);
        Ok(())
    }
}

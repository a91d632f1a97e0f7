//! Commit watermark — how far the checkpoint may safely advance.
//!
//! Transports report progress as `through_block` (see [`LogBatch`]); the
//! dispatcher reports which blocks still have events that are not yet
//! persisted. The committed block is the highest block with nothing
//! outstanding at or below it:
//!
//! ```text
//! committed = min(delivered, lowest_outstanding - 1)
//! ```
//!
//! [`LogBatch`]: crate::types::LogBatch

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Watermark {
    delivered: Option<u64>,
    /// block number -> events of that block not yet persisted
    outstanding: BTreeMap<u64, usize>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// An event of `block` has been accepted and is not yet persisted.
    pub fn begin(&mut self, block: u64) {
        *self.outstanding.entry(block).or_insert(0) += 1;
    }

    /// An event of `block` has been persisted.
    pub fn complete(&mut self, block: u64) {
        if let Some(count) = self.outstanding.get_mut(&block) {
            *count -= 1;
            if *count == 0 {
                self.outstanding.remove(&block);
            }
        }
    }

    /// Every log at or below `through_block` has been handed to the dispatcher.
    pub fn deliver(&mut self, through_block: u64) {
        self.delivered = self.delivered.max(Some(through_block));
    }

    /// Number of events not yet persisted.
    pub fn outstanding(&self) -> usize {
        self.outstanding.values().sum()
    }

    pub fn lowest_outstanding(&self) -> Option<u64> {
        self.outstanding.keys().next().copied()
    }

    /// Highest block whose events are all persisted, if any.
    pub fn committed_through(&self) -> Option<u64> {
        let delivered = self.delivered?;
        match self.lowest_outstanding() {
            None => Some(delivered),
            Some(0) => None,
            Some(low) => Some(delivered.min(low - 1)),
        }
    }
}

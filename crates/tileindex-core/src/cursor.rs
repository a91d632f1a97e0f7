//! Polling cursor — the next block a range scan will read.

use serde::{Deserialize, Serialize};

/// Position of a polling scan.
///
/// Ranges are inclusive on both ends: a scan covers
/// `[next_block, min(next_block + max_batch - 1, head)]` and then moves to
/// `batch_end + 1`, whether or not the range contained logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub next_block: u64,
}

impl Cursor {
    /// Create a cursor that will read `next_block` first.
    pub fn new(next_block: u64) -> Self {
        Self { next_block }
    }

    /// The range to query given the current chain `head`, or `None` if the
    /// head is behind the cursor (nothing to read, no regression).
    pub fn next_range(&self, head: u64, max_batch: u64) -> Option<(u64, u64)> {
        if head < self.next_block || max_batch == 0 {
            return None;
        }
        let end = self
            .next_block
            .saturating_add(max_batch - 1)
            .min(head);
        Some((self.next_block, end))
    }

    /// Move past a successfully queried range ending at `batch_end`.
    pub fn advance(&mut self, batch_end: u64) {
        self.next_block = self.next_block.max(batch_end.saturating_add(1));
    }

    /// The last block fully covered by the scan, if any.
    pub fn last_scanned(&self) -> Option<u64> {
        self.next_block.checked_sub(1)
    }
}

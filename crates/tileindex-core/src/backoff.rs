//! Capped exponential backoff.

use std::time::Duration;

/// Stateless backoff policy: `delay(attempt) = min(base * 2^attempt, cap)`.
///
/// `attempt` is 0-based, so the first retry waits `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    /// Delay before retry number `attempt` (0-based). Never exceeds `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(1_000, 30_000)
    }
}

//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// An undecoded contract log as delivered by a transport adapter.
///
/// Never persisted; it lives only until the decoder has classified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract (`0x…`).
    pub address: String,
    /// `topics[0]` is the event signature hash, the rest are indexed params.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed params (`0x…`).
    pub data: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    /// Unix timestamp of the block, when the node or adapter could supply it.
    pub block_timestamp: Option<i64>,
    /// `true` if the node reports the log as dropped by a reorg.
    pub removed: bool,
}

// ─── BlockSelector ───────────────────────────────────────────────────────────

/// Where a transport session starts reading logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSelector {
    /// Only logs produced from now on.
    Latest,
    /// Every log from this block (inclusive) onwards.
    Number(u64),
}

impl std::fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

// ─── LogBatch ────────────────────────────────────────────────────────────────

/// A group of logs handed from a transport to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    /// Logs in non-decreasing block order.
    pub logs: Vec<RawLog>,
    /// Every log the session will ever deliver with a block number at or
    /// below this value has been delivered by this batch or an earlier one.
    pub through_block: u64,
}

impl LogBatch {
    pub fn new(logs: Vec<RawLog>, through_block: u64) -> Self {
        Self { logs, through_block }
    }

    /// A batch that carries no logs, only progress.
    pub fn empty(through_block: u64) -> Self {
        Self::new(Vec::new(), through_block)
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

// ─── EventFilter ─────────────────────────────────────────────────────────────

/// Filter for which logs a transport asks the node for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only logs with one of these topic0 values (empty = all events).
    pub topic0_values: Vec<String>,
}

impl EventFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic0(&self, topic0: &str) -> bool {
        self.topic0_values.is_empty()
            || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }

    /// Returns `true` if the log passes both the address and topic0 filter.
    pub fn matches(&self, log: &RawLog) -> bool {
        self.matches_address(&log.address)
            && log
                .topics
                .first()
                .map(|t| self.matches_topic0(t))
                .unwrap_or(self.topic0_values.is_empty())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

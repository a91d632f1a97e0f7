//! Fluent builder API for indexer configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use tileindex_evm::IndexerBuilder;
//! use tileindex_core::indexer::{DispatchMode, StartPolicy};
//!
//! let config = IndexerBuilder::new()
//!     .contract("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .start(StartPolicy::Block(19_000_000))
//!     .max_blocks_per_batch(2_000)
//!     .dispatch(DispatchMode::Queued)
//!     .build()
//!     .expect("valid config");
//! ```

use tileindex_core::decoder::EventDecoder;
use tileindex_core::error::IndexerError;
use tileindex_core::indexer::{DispatchMode, IndexerConfig, StartPolicy};
use tileindex_core::types::EventFilter;

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the contract whose events are ingested.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Set where the first session starts.
    pub fn start(mut self, start: StartPolicy) -> Self {
        self.config.start = start;
        self
    }

    /// Start the first session at `block` (inclusive).
    pub fn from_block(self, block: u64) -> Self {
        self.start(StartPolicy::Block(block))
    }

    /// Set the polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the number of blocks per `eth_getLogs` range.
    pub fn max_blocks_per_batch(mut self, blocks: u64) -> Self {
        self.config.max_blocks_per_batch = blocks;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Reconnect delay is `min(base * 2^attempt, cap)`.
    pub fn backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.config.backoff_base_ms = base;
        self.config.backoff_cap_ms = cap;
        self
    }

    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Worker count and capacity of the queued dispatcher.
    pub fn queue(mut self, workers: usize, capacity: usize) -> Self {
        self.config.queue_workers = workers;
        self.config.queue_capacity = capacity;
        self
    }

    /// Tries per queued job and the base delay between them.
    pub fn job_retry(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.config.job_attempts = attempts;
        self.config.job_backoff_ms = backoff_ms;
        self
    }

    pub fn checkpoint_flush_ms(mut self, ms: u64) -> Self {
        self.config.checkpoint_flush_ms = ms;
        self
    }

    pub fn shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_timeout_ms = ms;
        self
    }

    /// Build the `IndexerConfig` without validating it.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build and validate the `IndexerConfig`.
    pub fn build(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Log filter for the indexed contract: its address plus the topic0 of every
/// event shape the decoder knows.
pub fn contract_filter(decoder: &EventDecoder) -> EventFilter {
    decoder
        .topic0_values()
        .into_iter()
        .fold(EventFilter::address(decoder.contract()), EventFilter::topic0)
}

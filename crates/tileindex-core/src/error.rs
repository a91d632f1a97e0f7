//! Error types for the tileindex pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting placement events.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {reason}")]
    Decode { reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the failure is expected to clear up on retry
    /// (socket drop, RPC timeout, store briefly unavailable).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Transport(_) | Self::Storage(_))
    }

    /// Returns `true` if the process must not keep running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::RetriesExhausted { .. })
    }
}

//! Indexer configuration and state types.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::IndexerError;

/// Where the first session starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Resume after the checkpoint if there is one, otherwise only new logs.
    Latest,
    /// Same as `Latest`; kept as a separate spelling of the intent.
    Resume,
    /// Start at this block (inclusive) on the first connection.
    Block(u64),
}

impl FromStr for StartPolicy {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "latest" => Ok(Self::Latest),
            "resume" => Ok(Self::Resume),
            other => other.parse::<u64>().map(Self::Block).map_err(|_| {
                IndexerError::Config(format!(
                    "starting block must be `latest`, `resume` or a block number, got `{s}`"
                ))
            }),
        }
    }
}

impl std::fmt::Display for StartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Resume => write!(f, "resume"),
            Self::Block(n) => write!(f, "{n}"),
        }
    }
}

/// How decoded events reach the projection sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Persist inline, in delivery order.
    Direct,
    /// Enqueue one job per event, persisted by a worker pool.
    Queued,
}

impl FromStr for DispatchMode {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "queued" | "queue" => Ok(Self::Queued),
            _ => Err(IndexerError::Config(format!(
                "dispatch mode must be `direct` or `queued`, got `{s}`"
            ))),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Queued => write!(f, "queued"),
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Contract whose events are ingested (`0x` + 40 hex chars).
    pub contract_address: String,
    /// Starting-block policy for the first connection.
    pub start: StartPolicy,
    /// Polling adapter tick interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum blocks per `eth_getLogs` range.
    pub max_blocks_per_batch: u64,
    /// Consecutive failed connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Reconnect backoff base (milliseconds).
    pub backoff_base_ms: u64,
    /// Reconnect backoff cap (milliseconds).
    pub backoff_cap_ms: u64,
    pub dispatch: DispatchMode,
    /// Worker tasks in queued mode.
    pub queue_workers: usize,
    /// Bounded queue length in queued mode.
    pub queue_capacity: usize,
    /// Tries per job in queued mode, including the first.
    pub job_attempts: u32,
    /// Base delay between job tries (milliseconds), doubled each retry.
    pub job_backoff_ms: u64,
    /// Periodic checkpoint flush interval (milliseconds).
    pub checkpoint_flush_ms: u64,
    /// Bound on draining in-flight work at shutdown (milliseconds).
    pub shutdown_timeout_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            start: StartPolicy::Latest,
            poll_interval_ms: 15_000,
            max_blocks_per_batch: 10_000,
            max_reconnect_attempts: 10,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            dispatch: DispatchMode::Direct,
            queue_workers: 4,
            queue_capacity: 1_024,
            job_attempts: 3,
            job_backoff_ms: 1_000,
            checkpoint_flush_ms: 1_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl IndexerConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if !is_address(&self.contract_address) {
            return Err(IndexerError::Config(format!(
                "contract address `{}` is not a 20-byte hex address",
                self.contract_address
            )));
        }
        let positive = [
            ("poll interval", self.poll_interval_ms),
            ("max blocks per batch", self.max_blocks_per_batch),
            ("backoff base", self.backoff_base_ms),
            ("checkpoint flush interval", self.checkpoint_flush_ms),
            ("queue workers", self.queue_workers as u64),
            ("queue capacity", self.queue_capacity as u64),
            ("job attempts", u64::from(self.job_attempts)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(IndexerError::Config(format!("{name} must be greater than zero")));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(IndexerError::Config(format!(
                "backoff cap ({} ms) is below backoff base ({} ms)",
                self.backoff_cap_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::from_millis(self.backoff_base_ms, self.backoff_cap_ms)
    }

    /// Uncapped: job retries are bounded by `job_attempts` instead.
    pub fn job_backoff(&self) -> Backoff {
        Backoff::from_millis(self.job_backoff_ms, u64::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn checkpoint_flush(&self) -> Duration {
        Duration::from_millis(self.checkpoint_flush_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Runtime state of the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// No session yet.
    Disconnected,
    /// Resolving the start block and opening a session.
    Connecting,
    /// A session is delivering logs.
    Live,
    /// Waiting before the next connection attempt.
    Backoff,
    /// Reconnect attempts exhausted. Terminal.
    Failed,
    /// Shut down on request. Terminal.
    Stopped,
}

impl IndexerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Live => write!(f, "live"),
            Self::Backoff => write!(f, "backoff"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

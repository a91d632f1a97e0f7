//! EVM log fetcher.
//!
//! [`EvmRpcClient`] is the request/response side of the chain RPC endpoint:
//! current height, block-range log queries, and block timestamps.
//! [`HttpRpcClient`] implements it over JSON-RPC with `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tileindex_core::error::IndexerError;
use tileindex_core::types::{EventFilter, RawLog};

use crate::rpc::{filter_object, logs_from_value, parse_hex_u64, to_hex, JsonRpcRequest, JsonRpcResponse};

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    /// Unix timestamp of block `number`, `None` if the node does not know it.
    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError>;

    /// All logs in `[from, to]` (inclusive) matching `filter`.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<RawLog>, IndexerError>;
}

/// HTTP JSON-RPC client.
///
/// Performs no retries of its own: a failed query surfaces to the polling
/// adapter, which retries the same range on its next tick.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| IndexerError::Transport(e.to_string()))?
            .into_result()
            .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")))
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc(format!("eth_blockNumber: unexpected result {v}")))
    }

    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        let v = self
            .call("eth_getBlockByNumber", vec![json!(to_hex(number)), json!(false)])
            .await?;
        Ok(block_timestamp(&v))
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let v = self
            .call("eth_getLogs", vec![filter_object(filter, Some((from, to)))])
            .await?;
        logs_from_value(v).map_err(|e| IndexerError::Rpc(format!("eth_getLogs: {e}")))
    }
}

/// The `timestamp` of an `eth_getBlockByNumber` result (`null` for unknown blocks).
pub fn block_timestamp(v: &Value) -> Option<i64> {
    v.get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_hex_u64)
        .and_then(|t| i64::try_from(t).ok())
}

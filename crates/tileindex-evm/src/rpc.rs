//! JSON-RPC 2.0 wire types shared by the HTTP and WebSocket transports.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tileindex_core::types::{EventFilter, RawLog};

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

/// A log as returned by `eth_getLogs` or an `eth_subscribe("logs")`
/// notification. Quantities are hex strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub block_hash: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    /// Some nodes include the block timestamp with each log.
    #[serde(default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RpcLog {
    /// Convert to a [`RawLog`]. Pending logs (no block number) yield `None`.
    pub fn into_raw(self) -> Option<RawLog> {
        let block_number = parse_hex_u64(self.block_number.as_deref()?)?;
        Some(RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number,
            block_hash: self.block_hash.unwrap_or_default(),
            tx_hash: self.transaction_hash.unwrap_or_default(),
            log_index: self
                .log_index
                .as_deref()
                .and_then(parse_hex_u64)
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(0),
            block_timestamp: self
                .block_timestamp
                .as_deref()
                .and_then(parse_hex_u64)
                .and_then(|t| i64::try_from(t).ok()),
            removed: self.removed.unwrap_or(false),
        })
    }
}

/// Parse a log array (`eth_getLogs` result), dropping pending entries.
pub fn logs_from_value(v: Value) -> Result<Vec<RawLog>, serde_json::Error> {
    let logs: Vec<RpcLog> = serde_json::from_value(v)?;
    Ok(logs.into_iter().filter_map(RpcLog::into_raw).collect())
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

pub fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

/// The filter object shared by `eth_getLogs` and `eth_subscribe("logs")`.
pub fn filter_object(filter: &EventFilter, range: Option<(u64, u64)>) -> Value {
    let mut obj = serde_json::Map::new();
    match filter.addresses.as_slice() {
        [] => {}
        [one] => {
            obj.insert("address".into(), json!(one));
        }
        many => {
            obj.insert("address".into(), json!(many));
        }
    }
    if !filter.topic0_values.is_empty() {
        obj.insert("topics".into(), json!([filter.topic0_values]));
    }
    if let Some((from, to)) = range {
        obj.insert("fromBlock".into(), json!(to_hex(from)));
        obj.insert("toBlock".into(), json!(to_hex(to)));
    }
    Value::Object(obj)
}

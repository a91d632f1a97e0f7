//! Live transport — `eth_subscribe("logs")` over a WebSocket.
//!
//! Session flow:
//!
//! ```text
//! connect ─► eth_subscribe ─► [backfill from N] ─► Connected ─► drain buffer ─► follow
//! ```
//!
//! A subscription only carries new logs. When the session starts from an
//! explicit block, the adapter subscribes first (so nothing can slip between
//! backfill and subscription), then reads the head and backfills
//! `[from, head]` with `eth_getLogs` over the same socket, buffering the
//! notifications that arrive meanwhile. Overlap between the two is harmless:
//! the projection sink is idempotent.
//!
//! `Connected` is only reported once the backfill has completed, so a session
//! whose catch-up fails counts as a failed connection attempt.
//!
//! A malformed frame or notification is reported as `Error` and the session
//! keeps reading. The adapter never reconnects; a lost connection ends the
//! session with a single `Closed`.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tileindex_core::cursor::Cursor;
use tileindex_core::error::IndexerError;
use tileindex_core::transport::{LogTransport, TransportEvent, TransportSession};
use tileindex_core::types::{BlockSelector, EventFilter, LogBatch, RawLog};

use crate::rpc::{filter_object, logs_from_value, parse_hex_u64, JsonRpcRequest, JsonRpcResponse, RpcId, RpcLog};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    url: String,
    filter: EventFilter,
    max_batch: u64,
}

impl WsTransport {
    /// `max_batch` bounds each backfill `eth_getLogs` range.
    pub fn new(url: impl Into<String>, filter: EventFilter, max_batch: u64) -> Self {
        Self {
            url: url.into(),
            filter,
            max_batch: max_batch.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LogTransport for WsTransport {
    fn name(&self) -> &str {
        "ws"
    }

    async fn start(&self, from: BlockSelector) -> Result<TransportSession, IndexerError> {
        tracing::info!(url = %self.url, from = %from, "connecting via WebSocket");
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| IndexerError::Transport(format!("WS connect failed: {e}")))?;
        let (sink, stream) = ws.split();

        let session = WsSession {
            sink,
            stream,
            filter: self.filter.clone(),
            max_batch: self.max_batch,
            next_id: 1,
            subscription: None,
            buffered: VecDeque::new(),
        };
        Ok(TransportSession::spawn(move |tx| session.run(from, tx)))
    }
}

/// Outcome of reading one frame.
enum Frame {
    Response(JsonRpcResponse),
    Log(RawLog),
    Malformed(String),
    Nothing,
}

struct WsSession {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    filter: EventFilter,
    max_batch: u64,
    next_id: u64,
    subscription: Option<String>,
    /// Events raised while waiting for a request's response.
    buffered: VecDeque<TransportEvent>,
}

impl WsSession {
    async fn run(mut self, from: BlockSelector, tx: mpsc::Sender<TransportEvent>) {
        match self.serve(from, &tx).await {
            Ok(()) => tracing::warn!("WebSocket closed by peer"),
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket session ended");
                let _ = tx.send(TransportEvent::Error(e)).await;
            }
        }
        let _ = self.sink.close().await;
        let _ = tx.send(TransportEvent::Closed).await;
    }

    /// Returns `Ok(())` on a clean close. Also returns early (Ok) once the
    /// receiver is gone.
    async fn serve(
        &mut self,
        from: BlockSelector,
        tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), IndexerError> {
        let sub = self
            .request("eth_subscribe", vec![json!("logs"), filter_object(&self.filter, None)])
            .await?;
        let sub = sub
            .as_str()
            .ok_or_else(|| IndexerError::Rpc(format!("eth_subscribe: unexpected result {sub}")))?
            .to_string();
        tracing::info!(subscription = %sub, "log subscription established");
        self.subscription = Some(sub);

        if let BlockSelector::Number(start) = from {
            if !self.backfill(start, tx).await? {
                return Ok(());
            }
        }

        if tx.send(TransportEvent::Connected).await.is_err() {
            return Ok(());
        }

        while let Some(event) = self.buffered.pop_front() {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }

        loop {
            let event = match self.read_frame().await? {
                None => return Ok(()),
                Some(Frame::Log(log)) => live_batch(log),
                Some(Frame::Malformed(reason)) => malformed(reason),
                Some(Frame::Response(resp)) => {
                    tracing::debug!(id = ?resp.id, "unsolicited JSON-RPC response");
                    continue;
                }
                Some(Frame::Nothing) => continue,
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Read historical logs `[start, head]`. Returns `false` if the receiver
    /// is gone.
    async fn backfill(
        &mut self,
        start: u64,
        tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<bool, IndexerError> {
        let head = self.request("eth_blockNumber", vec![]).await?;
        let head = head
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc(format!("eth_blockNumber: unexpected result {head}")))?;

        let mut cursor = Cursor::new(start);
        if head >= start {
            tracing::info!(from = start, to = head, "backfilling missed blocks");
        }
        while let Some((from, to)) = cursor.next_range(head, self.max_batch) {
            let result = self
                .request("eth_getLogs", vec![filter_object(&self.filter, Some((from, to)))])
                .await?;
            let mut logs = logs_from_value(result)
                .map_err(|e| IndexerError::Rpc(format!("eth_getLogs: {e}")))?;
            logs.retain(|l| !l.removed);
            logs.sort_by_key(|l| (l.block_number, l.log_index));
            tracing::debug!(from, to, logs = logs.len(), "backfill range fetched");

            if tx.send(TransportEvent::Logs(LogBatch::new(logs, to))).await.is_err() {
                return Ok(false);
            }
            cursor.advance(to);
        }
        Ok(true)
    }

    /// Send a request and wait for its response, buffering notifications.
    async fn request(&mut self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id;
        self.next_id += 1;
        let req = JsonRpcRequest::new(id, method, params);
        let text = serde_json::to_string(&req).map_err(|e| IndexerError::Other(e.to_string()))?;
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| IndexerError::Transport(format!("WS send failed: {e}")))?;

        loop {
            match self.read_frame().await? {
                None => {
                    return Err(IndexerError::Transport(format!(
                        "connection closed while waiting for {method}"
                    )))
                }
                Some(Frame::Response(resp)) if resp.id == RpcId::Number(id) => {
                    return resp
                        .into_result()
                        .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")));
                }
                Some(Frame::Response(_)) | Some(Frame::Nothing) => {}
                Some(Frame::Log(log)) => self.buffered.push_back(live_batch(log)),
                Some(Frame::Malformed(reason)) => self.buffered.push_back(malformed(reason)),
            }
        }
    }

    /// Read one frame. `None` means the connection is closed.
    async fn read_frame(&mut self) -> Result<Option<Frame>, IndexerError> {
        let msg = match self.stream.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(IndexerError::Transport(format!("WS receive error: {e}"))),
            Some(Ok(msg)) => msg,
        };
        match msg {
            Message::Text(text) => Ok(Some(self.parse_text(text.as_str()))),
            Message::Ping(payload) => {
                self.sink
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| IndexerError::Transport(format!("WS send failed: {e}")))?;
                Ok(Some(Frame::Nothing))
            }
            Message::Close(_) => Ok(None),
            _ => Ok(Some(Frame::Nothing)),
        }
    }

    fn parse_text(&self, text: &str) -> Frame {
        let val = match serde_json::from_str::<Value>(text) {
            Ok(val) => val,
            Err(e) => return Frame::Malformed(format!("malformed WebSocket frame: {e}")),
        };

        if val.get("method").and_then(Value::as_str) == Some("eth_subscription") {
            let params = &val["params"];
            let ours = params["subscription"].as_str().is_some_and(|s| {
                self.subscription.as_deref().map_or(true, |mine| mine == s)
            });
            if !ours {
                return Frame::Nothing;
            }
            return match serde_json::from_value::<RpcLog>(params["result"].clone())
                .ok()
                .and_then(RpcLog::into_raw)
            {
                Some(log) if log.removed => {
                    tracing::debug!(block = log.block_number, "dropping removed log");
                    Frame::Nothing
                }
                Some(log) => Frame::Log(log),
                None => Frame::Malformed(format!("malformed log notification: {}", params["result"])),
            };
        }

        match serde_json::from_value::<JsonRpcResponse>(val) {
            Ok(resp) => Frame::Response(resp),
            Err(_) => Frame::Nothing,
        }
    }
}

/// One live log as a batch. Its own block may still grow; everything before
/// it is complete.
fn live_batch(log: RawLog) -> TransportEvent {
    let through = log.block_number.saturating_sub(1);
    TransportEvent::Logs(LogBatch::new(vec![log], through))
}

fn malformed(reason: String) -> TransportEvent {
    tracing::warn!(%reason, "dropping malformed frame");
    TransportEvent::Error(IndexerError::Transport(reason))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

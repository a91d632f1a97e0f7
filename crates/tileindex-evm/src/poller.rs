//! Polling transport — periodic `eth_getLogs` range scans.
//!
//! Each tick reads the chain head and queries
//! `[cursor, min(cursor + max_batch - 1, head)]`. The query runs inline in
//! the tick loop, so two queries can never overlap; ticks that fire while a
//! query is still running are skipped, not queued.
//!
//! - head behind the cursor: nothing to do, the cursor stays put
//! - empty range result: the cursor still advances to `batch_end + 1`
//! - query error: reported as [`TransportEvent::Error`], cursor unchanged,
//!   the next tick retries the same range

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use tileindex_core::cursor::Cursor;
use tileindex_core::error::IndexerError;
use tileindex_core::transport::{LogTransport, TransportEvent, TransportSession};
use tileindex_core::types::{BlockSelector, EventFilter, LogBatch, RawLog};

use crate::fetcher::EvmRpcClient;

pub struct PollingTransport<C> {
    client: Arc<C>,
    filter: EventFilter,
    interval: Duration,
    max_batch: u64,
    fetch_timestamps: bool,
}

impl<C: EvmRpcClient + 'static> PollingTransport<C> {
    pub fn new(client: Arc<C>, filter: EventFilter, interval: Duration, max_batch: u64) -> Self {
        Self {
            client,
            filter,
            interval,
            max_batch: max_batch.max(1),
            fetch_timestamps: true,
        }
    }

    /// Look up block timestamps for logs that lack one (default: on).
    pub fn fetch_timestamps(mut self, enabled: bool) -> Self {
        self.fetch_timestamps = enabled;
        self
    }
}

#[async_trait]
impl<C: EvmRpcClient + 'static> LogTransport for PollingTransport<C> {
    fn name(&self) -> &str {
        "poll"
    }

    async fn start(&self, from: BlockSelector) -> Result<TransportSession, IndexerError> {
        // Also proves the endpoint is reachable before reporting Connected.
        let head = self.client.get_block_number().await?;
        let cursor = Cursor::new(match from {
            BlockSelector::Number(n) => n,
            BlockSelector::Latest => head,
        });
        tracing::info!(
            from = cursor.next_block,
            head,
            interval_ms = self.interval.as_millis() as u64,
            max_batch = self.max_batch,
            "starting log polling"
        );

        let poller = Poller {
            client: Arc::clone(&self.client),
            filter: self.filter.clone(),
            max_batch: self.max_batch,
            fetch_timestamps: self.fetch_timestamps,
            cursor,
        };
        let interval = self.interval;
        Ok(TransportSession::spawn(move |tx| poller.run(interval, tx)))
    }
}

struct Poller<C> {
    client: Arc<C>,
    filter: EventFilter,
    max_batch: u64,
    fetch_timestamps: bool,
    cursor: Cursor,
}

impl<C: EvmRpcClient> Poller<C> {
    async fn run(mut self, interval: Duration, tx: mpsc::Sender<TransportEvent>) {
        if tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let event = match self.tick().await {
                Ok(Some(batch)) => TransportEvent::Logs(batch),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(from = self.cursor.next_block, error = %e, "poll failed, will retry range");
                    TransportEvent::Error(e)
                }
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    /// One poll. `Ok(None)` when the head has not reached the cursor.
    async fn tick(&mut self) -> Result<Option<LogBatch>, IndexerError> {
        let head = self.client.get_block_number().await?;
        let Some((from, to)) = self.cursor.next_range(head, self.max_batch) else {
            tracing::trace!(head, next = self.cursor.next_block, "no new blocks");
            return Ok(None);
        };

        tracing::debug!(from, to, head, "polling for events");
        let mut logs: Vec<RawLog> = self
            .client
            .get_logs(from, to, &self.filter)
            .await?
            .into_iter()
            .filter(|l| !l.removed)
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));

        if self.fetch_timestamps {
            self.enrich_timestamps(&mut logs).await;
        }

        if !logs.is_empty() {
            tracing::info!(from, to, logs = logs.len(), "fetched logs");
        }
        self.cursor.advance(to);
        Ok(Some(LogBatch::new(logs, to)))
    }

    /// Best effort: a failed lookup leaves the timestamp empty.
    async fn enrich_timestamps(&self, logs: &mut [RawLog]) {
        let blocks: BTreeSet<u64> = logs
            .iter()
            .filter(|l| l.block_timestamp.is_none())
            .map(|l| l.block_number)
            .collect();
        for block in blocks {
            match self.client.get_block_timestamp(block).await {
                Ok(Some(ts)) => logs
                    .iter_mut()
                    .filter(|l| l.block_number == block)
                    .for_each(|l| l.block_timestamp = Some(ts)),
                Ok(None) => {}
                Err(e) => tracing::warn!(block, error = %e, "block timestamp lookup failed"),
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

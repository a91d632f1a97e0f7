//! Dispatcher — routes decoded events to the projection sink.
//!
//! Two strategies behind one trait, chosen at wiring time:
//!
//! - [`DirectDispatcher`] persists inline, in delivery order. A failed upsert
//!   is reported and kept; it is retried at the start of the next batch and
//!   holds the checkpoint back until it succeeds.
//! - [`QueuedDispatcher`] enqueues one job per event into a [`WorkQueue`],
//!   decoupling RPC throughput from storage latency.
//!
//! Both track a [`Watermark`] so the Supervisor knows how far the checkpoint
//! may advance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::decoder::EventDecoder;
use crate::event::DomainEvent;
use crate::indexer::{DispatchMode, IndexerConfig};
use crate::queue::{QueueConfig, WorkQueue};
use crate::sink::ProjectionSink;
use crate::types::LogBatch;
use crate::watermark::Watermark;

/// What one `dispatch` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Raw logs in the batch.
    pub received: usize,
    /// Logs that matched no known event shape.
    pub skipped: usize,
    /// Events persisted inline (direct mode).
    pub persisted: usize,
    /// Events whose upsert failed inline (direct mode).
    pub failed: usize,
    /// Events handed to the work queue (queued mode).
    pub enqueued: usize,
    /// Previously failed events retried before this batch.
    pub retried: usize,
}

#[async_trait]
pub trait Dispatcher: Send {
    /// Decode and route every log of `batch`. Never aborts on a single
    /// log's failure.
    async fn dispatch(&mut self, batch: LogBatch) -> DispatchReport;

    /// Highest block whose events are all persisted.
    fn committed_through(&self) -> Option<u64>;

    /// Finish in-flight work, bounded by `timeout`. Returns the number of
    /// events left unpersisted.
    async fn drain(&mut self, timeout: Duration) -> usize;
}

/// Build the dispatcher selected by `config.dispatch`.
///
/// Must be called inside a Tokio runtime (queued mode spawns workers).
pub fn build_dispatcher(
    config: &IndexerConfig,
    decoder: EventDecoder,
    sink: Arc<dyn ProjectionSink>,
) -> Box<dyn Dispatcher> {
    match config.dispatch {
        DispatchMode::Direct => Box::new(DirectDispatcher::new(decoder, sink)),
        DispatchMode::Queued => {
            let queue = QueueConfig {
                workers: config.queue_workers,
                capacity: config.queue_capacity,
                attempts: config.job_attempts,
                backoff: config.job_backoff(),
            };
            Box::new(QueuedDispatcher::new(decoder, sink, queue))
        }
    }
}

// ─── Direct ──────────────────────────────────────────────────────────────────

pub struct DirectDispatcher {
    decoder: EventDecoder,
    sink: Arc<dyn ProjectionSink>,
    watermark: Watermark,
    /// Events whose upsert failed, in delivery order.
    pending: Vec<DomainEvent>,
}

impl DirectDispatcher {
    pub fn new(decoder: EventDecoder, sink: Arc<dyn ProjectionSink>) -> Self {
        Self {
            decoder,
            sink,
            watermark: Watermark::new(),
            pending: Vec::new(),
        }
    }

    /// Events waiting for a retry.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Cancel-safe: an event leaves `pending` only after its upsert succeeded.
    async fn retry_pending(&mut self) -> usize {
        let mut retried = 0;
        let mut i = 0;
        while i < self.pending.len() {
            retried += 1;
            if self.persist(&self.pending[i]).await {
                let event = self.pending.remove(i);
                self.watermark.complete(event.block_number());
            } else {
                i += 1;
            }
        }
        retried
    }

    async fn persist(&self, event: &DomainEvent) -> bool {
        let (x, y) = event.coordinate();
        match self.sink.upsert(event).await {
            Ok(()) => {
                tracing::debug!(
                    kind = %event.kind(),
                    block = event.block_number(),
                    x,
                    y,
                    item = event.item_id(),
                    "event persisted"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    kind = %event.kind(),
                    block = event.block_number(),
                    x,
                    y,
                    tx = %event.meta().tx_hash,
                    error = %e,
                    "failed to persist event"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Dispatcher for DirectDispatcher {
    async fn dispatch(&mut self, batch: LogBatch) -> DispatchReport {
        let mut report = DispatchReport {
            received: batch.logs.len(),
            retried: self.retry_pending().await,
            ..Default::default()
        };

        for log in &batch.logs {
            let Some(event) = self.decoder.decode(log) else {
                report.skipped += 1;
                continue;
            };
            let block = event.block_number();
            self.watermark.begin(block);
            if self.persist(&event).await {
                self.watermark.complete(block);
                report.persisted += 1;
            } else {
                self.pending.push(event);
                report.failed += 1;
            }
        }

        self.watermark.deliver(batch.through_block);
        report
    }

    fn committed_through(&self) -> Option<u64> {
        self.watermark.committed_through()
    }

    async fn drain(&mut self, timeout: Duration) -> usize {
        if !self.pending.is_empty()
            && tokio::time::timeout(timeout, self.retry_pending()).await.is_err()
        {
            tracing::warn!("retry of failed events timed out during drain");
        }
        self.pending.len()
    }
}

// ─── Queued ──────────────────────────────────────────────────────────────────

pub struct QueuedDispatcher {
    decoder: EventDecoder,
    queue: WorkQueue,
}

impl QueuedDispatcher {
    pub fn new(decoder: EventDecoder, sink: Arc<dyn ProjectionSink>, config: QueueConfig) -> Self {
        Self {
            decoder,
            queue: WorkQueue::start(config, sink),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }
}

#[async_trait]
impl Dispatcher for QueuedDispatcher {
    async fn dispatch(&mut self, batch: LogBatch) -> DispatchReport {
        let mut report = DispatchReport {
            received: batch.logs.len(),
            retried: self.queue.redrive_dead_letters().await,
            ..Default::default()
        };

        for log in &batch.logs {
            let Some(event) = self.decoder.decode(log) else {
                report.skipped += 1;
                continue;
            };
            match self.queue.enqueue(event).await {
                Ok(()) => report.enqueued += 1,
                Err(e) => {
                    tracing::error!(block = log.block_number, error = %e, "failed to enqueue event");
                    report.failed += 1;
                }
            }
        }

        self.queue.deliver(batch.through_block);
        report
    }

    fn committed_through(&self) -> Option<u64> {
        self.queue.committed_through()
    }

    async fn drain(&mut self, timeout: Duration) -> usize {
        self.queue.close(timeout).await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

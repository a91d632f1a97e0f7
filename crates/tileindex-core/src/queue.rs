//! Bounded, retrying work queue for projection writes.
//!
//! One job per decoded event. A pool of workers pulls jobs from a bounded
//! channel and upserts them with per-job retry (`attempts` tries, backoff
//! between them). A job that exhausts its tries is moved to the dead-letter
//! list; its block stays outstanding in the shared [`Watermark`], so the
//! checkpoint never passes it until a redrive succeeds.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::error::IndexerError;
use crate::event::DomainEvent;
use crate::sink::ProjectionSink;
use crate::watermark::Watermark;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    /// Tries per job, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1_024,
            attempts: 3,
            backoff: Backoff::from_millis(1_000, u64::MAX),
        }
    }
}

#[derive(Debug)]
struct Job {
    event: DomainEvent,
}

/// State shared between the queue handle and its workers.
#[derive(Default)]
struct Shared {
    watermark: Mutex<Watermark>,
    dead: Mutex<Vec<DomainEvent>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WorkQueue {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Spawn `config.workers` workers writing to `sink`.
    pub fn start(config: QueueConfig, sink: Arc<dyn ProjectionSink>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared::default());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let sink = Arc::clone(&sink);
                let shared = Arc::clone(&shared);
                let config = config.clone();
                tokio::spawn(async move { worker(id, rx, sink, shared, config).await })
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            shared,
        }
    }

    /// Enqueue `event`, waiting for queue space.
    pub async fn enqueue(&self, event: DomainEvent) -> Result<(), IndexerError> {
        lock(&self.shared.watermark).begin(event.block_number());
        self.submit(event).await
    }

    async fn submit(&self, event: DomainEvent) -> Result<(), IndexerError> {
        let tx = self.tx.as_ref().ok_or_else(|| IndexerError::Aborted {
            reason: "work queue is closed".into(),
        })?;
        tx.send(Job { event }).await.map_err(|_| IndexerError::Aborted {
            reason: "work queue workers are gone".into(),
        })
    }

    /// Re-enqueue every dead-lettered job. Returns how many were redriven.
    pub async fn redrive_dead_letters(&self) -> usize {
        let dead = std::mem::take(&mut *lock(&self.shared.dead));
        if dead.is_empty() {
            return 0;
        }
        tracing::info!(jobs = dead.len(), "redriving dead-lettered jobs");

        let mut redriven = 0;
        let mut rest = dead.into_iter();
        while let Some(event) = rest.next() {
            if self.submit(event.clone()).await.is_err() {
                // queue closed: what is left stays dead and outstanding
                let mut list = lock(&self.shared.dead);
                list.push(event);
                list.extend(rest);
                break;
            }
            redriven += 1;
        }
        redriven
    }

    /// Mark everything up to `through_block` as handed to the queue.
    pub fn deliver(&self, through_block: u64) {
        lock(&self.shared.watermark).deliver(through_block);
    }

    pub fn committed_through(&self) -> Option<u64> {
        lock(&self.shared.watermark).committed_through()
    }

    /// Jobs accepted but not yet persisted (queued, running or dead).
    pub fn outstanding(&self) -> usize {
        lock(&self.shared.watermark).outstanding()
    }

    pub fn dead_letters(&self) -> usize {
        lock(&self.shared.dead).len()
    }

    /// Stop accepting jobs and wait up to `timeout` for the workers to finish
    /// what is queued. Workers still running after that are aborted.
    ///
    /// Returns the number of jobs left unpersisted.
    pub async fn close(&mut self, timeout: Duration) -> usize {
        self.tx.take();
        let workers = std::mem::take(&mut self.workers);
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(timeout, futures::future::join_all(workers))
            .await
            .is_err()
        {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "queue drain timed out");
            for handle in aborts {
                handle.abort();
            }
        }
        self.outstanding()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    sink: Arc<dyn ProjectionSink>,
    shared: Arc<Shared>,
    config: QueueConfig,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker = id, "queue closed, worker exiting");
            return;
        };
        let block = job.event.block_number();
        let (x, y) = job.event.coordinate();

        let mut attempt = 0u32;
        loop {
            match sink.upsert(&job.event).await {
                Ok(()) => {
                    lock(&shared.watermark).complete(block);
                    break;
                }
                Err(e) if attempt + 1 < config.attempts => {
                    let delay = config.backoff.delay(attempt);
                    tracing::warn!(
                        worker = id,
                        block,
                        x,
                        y,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "upsert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        worker = id,
                        block,
                        x,
                        y,
                        attempts = config.attempts,
                        error = %e,
                        "upsert failed permanently, job dead-lettered"
                    );
                    lock(&shared.dead).push(job.event);
                    break;
                }
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! The `LogTransport` trait — how raw logs are obtained.
//!
//! A transport is started from a [`BlockSelector`] and returns a
//! [`TransportSession`]: a bounded channel of [`TransportEvent`]s plus a
//! [`SessionHandle`] that owns the background task producing them. The
//! Supervisor is transport-agnostic; it only ever sees this contract.
//!
//! ```text
//! [catch-up Logs*] ─► Connected ─► Logs* / Error* ─► Closed
//! ```
//!
//! A session that closes before `Connected` counts as a failed attempt, even
//! if it delivered catch-up logs.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IndexerError;
use crate::types::{BlockSelector, LogBatch};

/// Capacity of the event channel between a transport task and its consumer.
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Something a running transport session reports.
#[derive(Debug)]
pub enum TransportEvent {
    /// The session is live (subscription confirmed and caught up / first
    /// head answered).
    Connected,
    /// A batch of raw logs in non-decreasing block order.
    Logs(LogBatch),
    /// A recoverable error; the session keeps running.
    Error(IndexerError),
    /// The connection is gone. Sent at most once, always last.
    Closed,
}

/// Owner of a transport's background task.
#[derive(Debug)]
pub struct SessionHandle {
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Abort the task and wait until it has fully stopped. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancelled is the expected outcome.
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A running transport session.
#[derive(Debug)]
pub struct TransportSession {
    events: mpsc::Receiver<TransportEvent>,
    handle: SessionHandle,
}

impl TransportSession {
    pub fn new(events: mpsc::Receiver<TransportEvent>, handle: SessionHandle) -> Self {
        Self { events, handle }
    }

    /// Spawn `task` with a fresh event channel and wrap it in a session.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(mpsc::Sender<TransportEvent>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let handle = tokio::spawn(task(tx));
        Self::new(rx, SessionHandle::new(handle))
    }

    /// Next event. A session whose task ended without `Closed` reports
    /// `Closed` once the channel drains.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.events.recv().await.unwrap_or(TransportEvent::Closed)
    }

    /// Stop the session. No event is observable after this returns.
    pub async fn stop(mut self) {
        self.handle.stop().await;
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }
}

/// A source of raw logs for one contract.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Short identifier used in logs (`"ws"`, `"poll"`).
    fn name(&self) -> &str;

    /// Start a session delivering logs from `from` onwards.
    ///
    /// Errors are connection-establishment failures; the Supervisor counts
    /// them as a failed attempt.
    async fn start(&self, from: BlockSelector) -> Result<TransportSession, IndexerError>;
}

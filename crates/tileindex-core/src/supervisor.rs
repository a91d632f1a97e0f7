//! Connection supervisor — owns the transport lifecycle.
//!
//! ```text
//! Disconnected ─► Connecting ─► Live ─(Closed / start error)─► Backoff ─► Connecting ─► …
//!                                                                 └─(attempts exhausted)─► Failed
//! any state ─(shutdown)─► Stopped
//! ```
//!
//! The Supervisor resolves where each session starts, feeds every delivered
//! batch through the [`Dispatcher`], and advances the checkpoint to the
//! dispatcher's committed watermark after each batch and on a periodic flush.
//! All reconnect state lives in the Supervisor instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::backoff::Backoff;
use crate::checkpoint::CheckpointManager;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::IndexerError;
use crate::indexer::{IndexerConfig, IndexerState, StartPolicy};
use crate::transport::{LogTransport, TransportEvent, TransportSession};
use crate::types::BlockSelector;

/// Progress notifications for observers (tests, status reporting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(IndexerState),
    SessionStarted { from: BlockSelector },
    /// `attempt` is 1-based: the n-th consecutive failure.
    BackoffScheduled { attempt: u32, delay: Duration },
    BatchDispatched { through_block: u64, report: DispatchReport },
    CheckpointAdvanced(u64),
}

/// Pick the block a new session starts from.
///
/// First connection: explicit block > checkpoint + 1 > latest.
/// Reconnects: checkpoint + 1 > explicit block > latest, so a committed
/// range is never read again as "from latest".
pub fn resolve_start(policy: StartPolicy, checkpoint: Option<u64>, first: bool) -> BlockSelector {
    let explicit = match policy {
        StartPolicy::Block(n) => Some(n),
        StartPolicy::Latest | StartPolicy::Resume => None,
    };
    let resume = checkpoint.map(|c| c.saturating_add(1));
    let chosen = if first {
        explicit.or(resume)
    } else {
        resume.or(explicit)
    };
    chosen.map_or(BlockSelector::Latest, BlockSelector::Number)
}

/// How a session ended.
enum SessionEnd {
    Shutdown,
    Closed,
}

enum Step {
    Shutdown,
    Event(TransportEvent),
    Flush,
}

pub struct Supervisor {
    config: IndexerConfig,
    transport: Arc<dyn LogTransport>,
    dispatcher: Box<dyn Dispatcher>,
    checkpoint: CheckpointManager,
    backoff: Backoff,
    state: watch::Sender<IndexerState>,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    /// Consecutive failed connection attempts.
    attempt: u32,
    connected_once: bool,
}

impl Supervisor {
    pub fn new(
        config: IndexerConfig,
        transport: Arc<dyn LogTransport>,
        dispatcher: Box<dyn Dispatcher>,
        checkpoint: CheckpointManager,
    ) -> Self {
        let (state, _) = watch::channel(IndexerState::Disconnected);
        Self {
            backoff: config.reconnect_backoff(),
            config,
            transport,
            dispatcher,
            checkpoint,
            state,
            events: None,
            attempt: 0,
            connected_once: false,
        }
    }

    /// Report progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> IndexerState {
        *self.state.borrow()
    }

    /// Run until `shutdown` turns `true` (returns `Ok`) or reconnect attempts
    /// are exhausted (returns [`IndexerError::RetriesExhausted`]).
    ///
    /// A dropped shutdown sender is never treated as a shutdown request.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        loop {
            self.set_state(IndexerState::Connecting);

            let started = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => None,
                r = self.connect() => Some(r),
            };

            let end = match started {
                None => SessionEnd::Shutdown,
                Some(Ok(session)) => self.drive(session, &mut shutdown).await,
                Some(Err(e)) => {
                    tracing::warn!(
                        transport = self.transport.name(),
                        attempt = self.attempt + 1,
                        error = %e,
                        "failed to start session"
                    );
                    SessionEnd::Closed
                }
            };

            match end {
                SessionEnd::Shutdown => return self.shutdown().await,
                SessionEnd::Closed => {
                    self.flush().await;
                    if self.attempt >= self.config.max_reconnect_attempts {
                        return self.fail().await;
                    }
                    let delay = self.backoff.delay(self.attempt);
                    self.attempt += 1;
                    self.set_state(IndexerState::Backoff);
                    tracing::warn!(
                        attempt = self.attempt,
                        max_attempts = self.config.max_reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "connection lost, reconnecting after backoff"
                    );
                    self.emit(SupervisorEvent::BackoffScheduled {
                        attempt: self.attempt,
                        delay,
                    });

                    let interrupted = tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown) => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if interrupted {
                        return self.shutdown().await;
                    }
                }
            }
        }
    }

    /// Resolve the start block and open a session.
    async fn connect(&mut self) -> Result<TransportSession, IndexerError> {
        let checkpoint = self.checkpoint.load().await?;
        let from = resolve_start(self.config.start, checkpoint, !self.connected_once);
        tracing::info!(
            transport = self.transport.name(),
            from = %from,
            checkpoint = ?checkpoint,
            "starting session"
        );
        let session = self.transport.start(from).await?;
        self.connected_once = true;
        self.emit(SupervisorEvent::SessionStarted { from });
        Ok(session)
    }

    /// Pump one session until it closes or shutdown is requested. The session
    /// is fully stopped when this returns.
    async fn drive(
        &mut self,
        mut session: TransportSession,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let period = self.config.checkpoint_flush();
        let mut flush = tokio::time::interval_at(Instant::now() + period, period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => Step::Shutdown,
                ev = session.next_event() => Step::Event(ev),
                _ = flush.tick() => Step::Flush,
            };

            match step {
                Step::Shutdown => {
                    session.stop().await;
                    return SessionEnd::Shutdown;
                }
                Step::Flush => self.flush().await,
                Step::Event(TransportEvent::Connected) => {
                    if self.attempt > 0 {
                        tracing::info!(after_attempts = self.attempt, "reconnected");
                    }
                    self.attempt = 0;
                    self.set_state(IndexerState::Live);
                }
                Step::Event(TransportEvent::Logs(batch)) => {
                    let through_block = batch.through_block;
                    let report = tokio::select! {
                        biased;
                        _ = wait_for_shutdown(shutdown) => None,
                        r = self.dispatcher.dispatch(batch) => Some(r),
                    };
                    let Some(report) = report else {
                        session.stop().await;
                        return SessionEnd::Shutdown;
                    };
                    if report.received > 0 || report.retried > 0 {
                        tracing::info!(
                            through_block,
                            logs = report.received,
                            skipped = report.skipped,
                            persisted = report.persisted,
                            enqueued = report.enqueued,
                            failed = report.failed,
                            "batch dispatched"
                        );
                    }
                    self.emit(SupervisorEvent::BatchDispatched {
                        through_block,
                        report,
                    });
                    self.flush().await;
                }
                Step::Event(TransportEvent::Error(e)) => {
                    tracing::warn!(transport = self.transport.name(), error = %e, "transport error");
                }
                Step::Event(TransportEvent::Closed) => {
                    tracing::warn!(transport = self.transport.name(), "session closed");
                    session.stop().await;
                    self.set_state(IndexerState::Disconnected);
                    return SessionEnd::Closed;
                }
            }
        }
    }

    /// Advance the checkpoint to the committed watermark.
    async fn commit(&mut self) -> Result<(), IndexerError> {
        let Some(block) = self.dispatcher.committed_through() else {
            return Ok(());
        };
        if self.checkpoint.advance(block).await? {
            self.emit(SupervisorEvent::CheckpointAdvanced(block));
        }
        Ok(())
    }

    /// Best-effort commit; a failure is retried on the next flush.
    async fn flush(&mut self) {
        if let Err(e) = self.commit().await {
            tracing::warn!(error = %e, "checkpoint write failed, will retry");
        }
    }

    /// Drain in-flight work and write the committed watermark.
    async fn finish(&mut self) -> Result<(), IndexerError> {
        let left = self.dispatcher.drain(self.config.shutdown_timeout()).await;
        if left > 0 {
            tracing::warn!(events = left, "events left unpersisted, they will be replayed on restart");
        }
        self.commit().await
    }

    async fn shutdown(&mut self) -> Result<(), IndexerError> {
        tracing::info!("shutdown requested, draining");
        let result = self.finish().await;
        self.set_state(IndexerState::Stopped);
        match &result {
            Ok(()) => tracing::info!(checkpoint = ?self.checkpoint.last(), "stopped"),
            Err(e) => tracing::error!(error = %e, "checkpoint write failed during shutdown"),
        }
        result
    }

    async fn fail(&mut self) -> Result<(), IndexerError> {
        let attempts = self.attempt;
        tracing::error!(attempts, "maximum reconnection attempts reached");
        if let Err(e) = self.finish().await {
            tracing::error!(error = %e, "checkpoint write failed while giving up");
        }
        self.set_state(IndexerState::Failed);
        Err(IndexerError::RetriesExhausted { attempts })
    }

    fn set_state(&mut self, state: IndexerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "state changed");
            self.emit(SupervisorEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Resolves once the flag is `true`. Pends forever if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

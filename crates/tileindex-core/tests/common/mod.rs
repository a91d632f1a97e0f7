//! Shared fixtures for Supervisor integration tests: a scripted transport,
//! a recording projection sink and raw log builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use tileindex_core::decoder::{keccak256_topic, ITEM_PLACED_SIGNATURE, ITEM_UPDATED_SIGNATURE};
use tileindex_core::{
    BlockSelector, DomainEvent, IndexerConfig, IndexerError, LogBatch, LogTransport,
    ProjectionSink, RawLog, SupervisorEvent, TileRow, TransportEvent, TransportSession,
};

pub const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const PLAYER: &str = "0x00000000000000000000000000000000000000aa";

pub fn config() -> IndexerConfig {
    IndexerConfig {
        contract_address: CONTRACT.into(),
        ..Default::default()
    }
}

// ─── Raw logs ─────────────────────────────────────────────────────────────────

fn raw(signature: &str, block: u64, log_index: u32, x: u16, y: u16, item: u8) -> RawLog {
    RawLog {
        address: CONTRACT.into(),
        topics: vec![
            keccak256_topic(signature),
            format!("0x{:0>64}", PLAYER.trim_start_matches("0x")),
        ],
        data: format!("0x{:064x}{:064x}{:064x}", x, y, item),
        block_number: block,
        block_hash: format!("0x{block:064x}"),
        tx_hash: format!("0x{:064x}", block * 1_000 + u64::from(log_index)),
        log_index,
        block_timestamp: None,
        removed: false,
    }
}

pub fn placed(block: u64, x: u16, y: u16, item: u8) -> RawLog {
    raw(ITEM_PLACED_SIGNATURE, block, 0, x, y, item)
}

pub fn updated(block: u64, x: u16, y: u16, item: u8) -> RawLog {
    raw(ITEM_UPDATED_SIGNATURE, block, 0, x, y, item)
}

pub fn unknown(block: u64) -> RawLog {
    let mut log = placed(block, 0, 0, 0);
    log.topics[0] = keccak256_topic("Transfer(address,address,uint256)");
    log
}

// ─── Scripted transport ──────────────────────────────────────────────────────

/// One step of a scripted session.
pub enum Step {
    Connected,
    Logs(LogBatch),
    Error(&'static str),
    Closed,
    /// Pause the session until the test notifies.
    Gate(Arc<Notify>),
}

/// A scripted session, or a refused `start`.
pub enum Script {
    Session(Vec<Step>),
    FailStart,
}

/// Transport that plays one script per `start` call. Once the scripts run
/// out, sessions stay open and silent.
pub struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    starts: Mutex<Vec<(BlockSelector, Instant)>>,
}

impl MockTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            starts: Mutex::new(Vec::new()),
        })
    }

    pub fn starts(&self) -> Vec<BlockSelector> {
        self.starts.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    /// Time between consecutive `start` calls.
    pub fn start_gaps(&self) -> Vec<Duration> {
        let starts = self.starts.lock().unwrap();
        starts.windows(2).map(|w| w[1].1 - w[0].1).collect()
    }
}

#[async_trait]
impl LogTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, from: BlockSelector) -> Result<TransportSession, IndexerError> {
        self.starts.lock().unwrap().push((from, Instant::now()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Session(Vec::new()));

        let steps = match script {
            Script::FailStart => return Err(IndexerError::Transport("connection refused".into())),
            Script::Session(steps) => steps,
        };

        Ok(TransportSession::spawn(move |tx| async move {
            for step in steps {
                let event = match step {
                    Step::Connected => TransportEvent::Connected,
                    Step::Logs(batch) => TransportEvent::Logs(batch),
                    Step::Error(msg) => TransportEvent::Error(IndexerError::Rpc(msg.into())),
                    Step::Closed => {
                        let _ = tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Step::Gate(gate) => {
                        gate.notified().await;
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await
        }))
    }
}

// ─── Recording sink ──────────────────────────────────────────────────────────

/// Projection sink over a map, with switchable failures per block.
#[derive(Default)]
pub struct RecordingSink {
    rows: Mutex<HashMap<(u16, u16), TileRow>>,
    failing_blocks: Mutex<HashSet<u64>>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every upsert takes `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn fail_block(&self, block: u64) {
        self.failing_blocks.lock().unwrap().insert(block);
    }

    pub fn heal(&self) {
        self.failing_blocks.lock().unwrap().clear();
    }

    pub fn row(&self, x: u16, y: u16) -> Option<TileRow> {
        self.rows.lock().unwrap().get(&(x, y)).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectionSink for RecordingSink {
    async fn upsert(&self, event: &DomainEvent) -> Result<(), IndexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_blocks.lock().unwrap().contains(&event.block_number()) {
            return Err(IndexerError::Storage("simulated outage".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        let key = event.coordinate();
        let stale = rows.get(&key).is_some_and(|row| !row.is_superseded_by(event));
        if !stale {
            rows.insert(key, TileRow::from_event(event, 0));
        }
        Ok(())
    }
}

// ─── Observers ───────────────────────────────────────────────────────────────

/// Receive Supervisor events until `pred` matches one. Panics after 60s.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
    mut pred: impl FnMut(&SupervisorEvent) -> bool,
) -> SupervisorEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("supervisor event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

/// Drain whatever events are already buffered.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

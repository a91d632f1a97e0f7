//! Supervisor integration tests: resume, idempotent redelivery, reconnect
//! backoff, retry exhaustion, direct-mode failure handling and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use tileindex_core::{
    build_dispatcher, BlockSelector, CheckpointManager, CheckpointStore, DispatchMode,
    EventDecoder, IndexerConfig, IndexerError, IndexerState, LogBatch, LogTransport,
    MemoryCheckpointStore, ProjectionSink, StartPolicy, Supervisor, SupervisorEvent,
};

use common::*;

// ─── Helpers ──────────────────────────────────────────────────────────────────

type RunResult = (Result<(), IndexerError>, IndexerState);

fn supervisor(
    config: IndexerConfig,
    transport: Arc<dyn LogTransport>,
    sink: Arc<dyn ProjectionSink>,
    store: Arc<dyn CheckpointStore>,
) -> (Supervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
    let dispatcher = build_dispatcher(&config, EventDecoder::new(CONTRACT), sink);
    let (tx, rx) = mpsc::unbounded_channel();
    let sup = Supervisor::new(config, transport, dispatcher, CheckpointManager::new(store))
        .with_events(tx);
    (sup, rx)
}

fn spawn(mut sup: Supervisor) -> (watch::Sender<bool>, JoinHandle<RunResult>) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let result = sup.run(stop_rx).await;
        (result, sup.state())
    });
    (stop_tx, handle)
}

fn backoff_delays(events: &[SupervisorEvent]) -> Vec<u128> {
    events
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::BackoffScheduled { delay, .. } => Some(delay.as_millis()),
            _ => None,
        })
        .collect()
}

// ─── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resumes_after_checkpoint_and_commits_batch() {
    let store = Arc::new(MemoryCheckpointStore::at(1000));
    let sink = RecordingSink::new();
    let logs = (1001..=1005).map(|b| placed(b, b as u16, 7, 1)).collect();
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(logs, 1005)),
    ])]);

    let (sup, mut events) = supervisor(config(), transport.clone(), sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(1005)).await;
    stop.send(true).unwrap();
    let (result, state) = handle.await.unwrap();

    result.unwrap();
    assert_eq!(state, IndexerState::Stopped);
    assert_eq!(transport.starts(), vec![BlockSelector::Number(1001)]);
    assert_eq!(sink.len(), 5);
    assert_eq!(store.get().await.unwrap(), Some(1005));
}

#[tokio::test]
async fn explicit_start_wins_on_first_connection_only() {
    let store = Arc::new(MemoryCheckpointStore::at(1000));
    let transport = MockTransport::new(vec![
        Script::Session(vec![
            Step::Connected,
            Step::Logs(LogBatch::new(vec![placed(501, 1, 1, 1)], 501)),
            Step::Closed,
        ]),
        Script::Session(vec![Step::Connected]),
    ]);
    let cfg = IndexerConfig {
        start: StartPolicy::Block(500),
        backoff_base_ms: 1,
        backoff_cap_ms: 1,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport.clone(), RecordingSink::new(), store);
    let (stop, handle) = spawn(sup);

    // second Live is the reconnected session
    for _ in 0..2 {
        wait_for(&mut events, |e| *e == SupervisorEvent::StateChanged(IndexerState::Live)).await;
    }
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    // the stored checkpoint (1000) is ahead of what the first session committed
    assert_eq!(
        transport.starts(),
        vec![BlockSelector::Number(500), BlockSelector::Number(1001)]
    );
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn redelivery_after_reconnect_is_idempotent_and_update_overwrites() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let sink = RecordingSink::new();
    let transport = MockTransport::new(vec![
        Script::Session(vec![
            Step::Connected,
            Step::Logs(LogBatch::new(vec![placed(50, 3, 4, 2)], 50)),
            Step::Closed,
        ]),
        Script::Session(vec![
            Step::Connected,
            // node replays the block we already stored
            Step::Logs(LogBatch::new(vec![placed(50, 3, 4, 2)], 50)),
            Step::Logs(LogBatch::new(vec![updated(51, 3, 4, 9)], 51)),
        ]),
    ]);
    let cfg = IndexerConfig {
        backoff_base_ms: 10,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport.clone(), sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(51)).await;
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.calls(), 3);
    let row = sink.row(3, 4).unwrap();
    assert_eq!(row.item_id, 9);
    assert_eq!(row.block_number, 51);
    assert_eq!(
        transport.starts(),
        vec![BlockSelector::Latest, BlockSelector::Number(51)]
    );
}

#[tokio::test]
async fn unknown_logs_are_dropped_and_ingestion_continues() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let sink = RecordingSink::new();
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(vec![unknown(10), placed(10, 1, 2, 3)], 10)),
    ])]);

    let (sup, mut events) = supervisor(config(), transport, sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    let ev = wait_for(&mut events, |e| matches!(e, SupervisorEvent::BatchDispatched { .. })).await;
    match ev {
        SupervisorEvent::BatchDispatched { report, .. } => {
            assert_eq!(report.skipped, 1);
            assert_eq!(report.persisted, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();
    assert_eq!(sink.len(), 1);
    assert_eq!(store.get().await.unwrap(), Some(10));
}

// ─── Backoff ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_from_base() {
    let transport = MockTransport::new(vec![
        Script::Session(vec![Step::Closed]),
        Script::Session(vec![Step::Closed]),
        Script::Session(vec![Step::Closed]),
        Script::Session(vec![Step::Connected]),
    ]);

    let (sup, mut events) = supervisor(
        config(),
        transport.clone(),
        RecordingSink::new(),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| *e == SupervisorEvent::StateChanged(IndexerState::Live)).await;
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    let gaps: Vec<u128> = transport.start_gaps().iter().map(Duration::as_millis).collect();
    assert_eq!(gaps.len(), 3);
    for (gap, expected) in gaps.iter().zip([1_000u128, 2_000, 4_000]) {
        assert!(
            *gap >= expected && *gap < expected + 50,
            "gap {gap}ms, expected ~{expected}ms"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_reported_and_reset_after_live() {
    let transport = MockTransport::new(vec![
        Script::Session(vec![Step::Connected, Step::Closed]),
        Script::Session(vec![Step::Closed]),
        Script::Session(vec![Step::Connected, Step::Closed]),
        Script::Session(vec![Step::Closed]),
        Script::Session(vec![Step::Connected]),
    ]);

    let (sup, mut events) = supervisor(
        config(),
        transport.clone(),
        RecordingSink::new(),
        Arc::new(MemoryCheckpointStore::new()),
    );
    let (stop, handle) = spawn(sup);

    let mut seen = Vec::new();
    let mut lives = 0;
    while lives < 3 {
        let ev = wait_for(&mut events, |_| true).await;
        if ev == SupervisorEvent::StateChanged(IndexerState::Live) {
            lives += 1;
        }
        seen.push(ev);
    }
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    assert_eq!(backoff_delays(&seen), vec![1_000, 2_000, 1_000, 2_000]);
    assert_eq!(transport.starts().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_fail_with_checkpoint_intact() {
    let store = Arc::new(MemoryCheckpointStore::at(77));
    let transport = MockTransport::new(vec![
        Script::FailStart,
        Script::FailStart,
        Script::FailStart,
        Script::FailStart,
    ]);
    let cfg = IndexerConfig {
        max_reconnect_attempts: 3,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport.clone(), RecordingSink::new(), store.clone());
    let mut state = sup.subscribe_state();
    let (_stop, handle) = spawn(sup);

    let (result, final_state) = handle.await.unwrap();
    assert!(matches!(result, Err(IndexerError::RetriesExhausted { attempts: 3 })));
    assert_eq!(final_state, IndexerState::Failed);
    assert_eq!(*state.borrow_and_update(), IndexerState::Failed);

    // first try plus three retries, all resuming from the checkpoint
    assert_eq!(transport.starts(), vec![BlockSelector::Number(78); 4]);
    assert_eq!(backoff_delays(&drain_events(&mut events)), vec![1_000, 2_000, 4_000]);
    assert_eq!(store.get().await.unwrap(), Some(77));
    assert!(store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sessions_failing_before_live_escalate_to_failed() {
    // a catch-up that keeps failing part way: logs arrive, the range after
    // them errors, and the session closes without ever going live
    let store = Arc::new(MemoryCheckpointStore::at(99));
    let transport = MockTransport::new(vec![
        Script::Session(vec![
            Step::Logs(LogBatch::new(vec![placed(100, 1, 1, 1)], 100)),
            Step::Error("eth_getLogs: block range too large"),
            Step::Closed,
        ]),
        Script::Session(vec![Step::Error("eth_getLogs: block range too large"), Step::Closed]),
        Script::Session(vec![Step::Error("eth_getLogs: block range too large"), Step::Closed]),
    ]);
    let cfg = IndexerConfig {
        max_reconnect_attempts: 2,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport.clone(), RecordingSink::new(), store.clone());
    let (_stop, handle) = spawn(sup);

    let (result, final_state) = handle.await.unwrap();
    assert!(matches!(result, Err(IndexerError::RetriesExhausted { attempts: 2 })));
    assert_eq!(final_state, IndexerState::Failed);

    let seen = drain_events(&mut events);
    assert!(!seen.contains(&SupervisorEvent::StateChanged(IndexerState::Live)));
    assert_eq!(backoff_delays(&seen), vec![1_000, 2_000]);
    // delivered progress is kept and later sessions resume after it
    assert_eq!(
        transport.starts(),
        vec![
            BlockSelector::Number(100),
            BlockSelector::Number(101),
            BlockSelector::Number(101),
        ]
    );
    assert_eq!(store.get().await.unwrap(), Some(100));
}

// ─── Direct-mode failures ────────────────────────────────────────────────────

#[tokio::test]
async fn failed_persist_holds_checkpoint_until_resolved() {
    let store = Arc::new(MemoryCheckpointStore::at(1000));
    let sink = RecordingSink::new();
    sink.fail_block(1002);
    let gate = Arc::new(Notify::new());
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(
            vec![placed(1001, 1, 0, 1), placed(1002, 2, 0, 1), placed(1003, 3, 0, 1)],
            1003,
        )),
        Step::Gate(gate.clone()),
        Step::Logs(LogBatch::empty(1004)),
    ])]);

    let (sup, mut events) = supervisor(config(), transport, sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    let ev = wait_for(&mut events, |e| matches!(e, SupervisorEvent::BatchDispatched { .. })).await;
    if let SupervisorEvent::BatchDispatched { report, .. } = ev {
        assert_eq!(report.persisted, 2);
        assert_eq!(report.failed, 1);
    }
    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(1001)).await;
    assert_eq!(sink.len(), 2);

    sink.heal();
    gate.notify_one();
    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(1004)).await;
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    assert_eq!(sink.len(), 3);
    assert_eq!(store.writes(), vec![1001, 1004]);
}

#[tokio::test]
async fn shutdown_never_commits_past_a_failed_event() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let sink = RecordingSink::new();
    sink.fail_block(21);
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(vec![placed(20, 1, 1, 1), placed(21, 2, 2, 2)], 25)),
    ])]);
    let cfg = IndexerConfig {
        shutdown_timeout_ms: 100,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport, sink, store.clone());
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| matches!(e, SupervisorEvent::BatchDispatched { .. })).await;
    stop.send(true).unwrap();
    let (result, state) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(state, IndexerState::Stopped);
    assert_eq!(store.get().await.unwrap(), Some(20));
}

#[tokio::test]
async fn transport_errors_do_not_end_the_session() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Error("malformed frame"),
        Step::Logs(LogBatch::new(vec![placed(3, 1, 1, 1)], 3)),
    ])]);

    let (sup, mut events) = supervisor(config(), transport.clone(), RecordingSink::new(), store);
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(3)).await;
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();
    assert_eq!(transport.starts().len(), 1);
}

// ─── Queued mode ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn queued_mode_drains_in_flight_jobs_on_shutdown() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let sink = RecordingSink::slow(Duration::from_millis(200));
    let logs = (0..10u64).map(|i| placed(1001 + i, i as u16, 0, 4)).collect();
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(logs, 1010)),
    ])]);
    let cfg = IndexerConfig {
        dispatch: DispatchMode::Queued,
        queue_workers: 2,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport, sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    let ev = wait_for(&mut events, |e| matches!(e, SupervisorEvent::BatchDispatched { .. })).await;
    if let SupervisorEvent::BatchDispatched { report, .. } = ev {
        assert_eq!(report.enqueued, 10);
    }
    stop.send(true).unwrap();
    let (result, state) = handle.await.unwrap();

    result.unwrap();
    assert_eq!(state, IndexerState::Stopped);
    assert_eq!(sink.len(), 10);
    assert_eq!(store.get().await.unwrap(), Some(1010));
}

#[tokio::test(start_paused = true)]
async fn queued_mode_retries_failed_jobs() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let sink = RecordingSink::new();
    sink.fail_block(7);
    let transport = MockTransport::new(vec![Script::Session(vec![
        Step::Connected,
        Step::Logs(LogBatch::new(vec![placed(7, 1, 1, 1)], 7)),
    ])]);
    let cfg = IndexerConfig {
        dispatch: DispatchMode::Queued,
        queue_workers: 1,
        job_attempts: 3,
        ..config()
    };

    let (sup, mut events) = supervisor(cfg, transport, sink.clone(), store.clone());
    let (stop, handle) = spawn(sup);

    wait_for(&mut events, |e| matches!(e, SupervisorEvent::BatchDispatched { .. })).await;
    // first try and first retry fail, then the store comes back
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    sink.heal();
    wait_for(&mut events, |e| *e == SupervisorEvent::CheckpointAdvanced(7)).await;
    stop.send(true).unwrap();
    handle.await.unwrap().0.unwrap();

    assert_eq!(sink.calls(), 3);
    assert_eq!(sink.len(), 1);
}

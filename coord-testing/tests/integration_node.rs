//! Coordination loop integration tests
//!
//! A scripted engine feeds Ready batches into a real node (hub, task
//! pipeline, loop) backed by sled storage, and the shared journal records
//! the order in which storage, state machine and engine observed them.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use coord_core::messages::{Message, MessageType};
use coord_core::network::{FrameSink, FrameSource};
use coord_core::serialization::decode_message;
use coord_core::{
    ConfState, CoordError, HardState, LogEntry, LogStorage, NodeId, Ready, Snapshot,
};
use coord_network::memory;
use coord_node::NodeConfig;
use coord_testing::{
    eventually, Event, FailPoint, Journal, RecordingStateMachine, RecordingStorage, Script,
    ScriptedEngine, TestNode,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn config() -> NodeConfig {
    NodeConfig::default().with_tick_interval(Duration::from_millis(20))
}

fn entries(range: std::ops::RangeInclusive<u64>, term: u64) -> Vec<LogEntry> {
    range
        .map(|index| LogEntry::new(index, term, format!("SET k{} v{}", index, index)))
        .collect()
}

struct Fixture {
    journal: Journal,
    storage: Arc<RecordingStorage>,
    script: Script,
    node: TestNode<ScriptedEngine, RecordingStateMachine>,
}

fn start(
    engine_setup: impl FnOnce(ScriptedEngine) -> ScriptedEngine,
    state_machine: impl FnOnce(Journal) -> RecordingStateMachine,
) -> Fixture {
    init_logging();
    let journal = Journal::new();
    let storage = Arc::new(RecordingStorage::new(journal.clone()).unwrap());
    let (engine, script) = ScriptedEngine::new(journal.clone());
    let node = TestNode::start(
        NodeId(1),
        config(),
        engine_setup(engine),
        storage.clone(),
        state_machine(journal.clone()),
    );
    Fixture {
        journal,
        storage,
        script,
        node,
    }
}

fn default_fixture() -> Fixture {
    start(|engine| engine, RecordingStateMachine::new)
}

#[tokio::test]
async fn test_ready_batch_is_persisted_before_apply_and_advance() {
    let fx = default_fixture();

    let hard_state = HardState {
        term: 3,
        vote: Some(NodeId(1)),
        commit: 11,
    };
    let snapshot = Snapshot::new(10, 2, ConfState::with_voters([1, 2, 3]), Bytes::new());
    fx.script.push(Ready {
        hard_state: Some(hard_state.clone()),
        snapshot: Some(snapshot.clone()),
        entries: entries(11..=12, 3),
        committed_entries: entries(11..=11, 3),
        ..Default::default()
    });

    assert!(eventually(WAIT, || fx.journal.contains(&Event::Advance)).await);
    assert_eq!(
        fx.journal.pipeline_events(),
        vec![
            Event::ApplySnapshot(10),
            Event::SetHardState(hard_state.clone()),
            Event::Append(vec![11, 12]),
            Event::Apply {
                entries: vec![11],
                snapshot: Some(10),
            },
            Event::Advance,
        ]
    );

    let storage = fx.storage.inner();
    assert_eq!(storage.snapshot().unwrap(), snapshot);
    assert_eq!(storage.hard_state().unwrap(), hard_state);
    assert_eq!(storage.first_index().unwrap(), 10);
    assert_eq!(storage.last_index().unwrap(), 12);

    let (outcome, sm) = fx.node.stop().await.unwrap();
    assert!(outcome.is_ok());
    assert_eq!(sm.state().get("k11"), Some("v11"));
    assert_eq!(sm.state().get("k12"), None);
}

#[tokio::test(flavor = "current_thread")]
async fn test_slow_storage_does_not_stall_the_runtime() {
    let fx = default_fixture();
    let delay = Duration::from_millis(400);
    fx.storage.slow_writes(delay);

    fx.script.push(Ready {
        hard_state: Some(HardState {
            term: 1,
            vote: Some(NodeId(1)),
            commit: 0,
        }),
        entries: entries(1..=2, 1),
        ..Default::default()
    });

    // Both writes take a full delay each; this task keeps getting polled
    // on the single runtime thread throughout.
    let mut longest_gap = Duration::ZERO;
    timeout(WAIT, async {
        while !fx.journal.contains(&Event::Append(vec![1, 2])) {
            let before = tokio::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(10)).await;
            longest_gap = longest_gap.max(before.elapsed());
        }
    })
    .await
    .unwrap();
    assert!(longest_gap < delay / 2, "runtime stalled for {:?}", longest_gap);

    assert!(eventually(WAIT, || fx.journal.contains(&Event::Advance)).await);
    let (outcome, _) = fx.node.stop().await.unwrap();
    assert!(outcome.is_ok());
    assert_eq!(fx.storage.last_index().unwrap(), 2);
}

#[tokio::test]
async fn test_empty_state_is_not_persisted() {
    let fx = default_fixture();

    fx.script.push(Ready {
        hard_state: Some(HardState::default()),
        snapshot: Some(Snapshot::default()),
        ..Default::default()
    });

    assert!(eventually(WAIT, || fx.journal.contains(&Event::Advance)).await);
    assert_eq!(
        fx.journal.pipeline_events(),
        vec![
            Event::Apply {
                entries: vec![],
                snapshot: None,
            },
            Event::Advance,
        ]
    );
    fx.node.stop().await.unwrap().0.unwrap();
}

#[tokio::test]
async fn test_advance_waits_for_task_completion() {
    let gate = Arc::new(Semaphore::new(0));
    let sm_gate = gate.clone();
    let fx = start(|engine| engine, move |journal| {
        RecordingStateMachine::new(journal).gated(sm_gate)
    });

    fx.script.push(Ready {
        entries: entries(1..=2, 1),
        committed_entries: entries(1..=2, 1),
        ..Default::default()
    });
    fx.script.push(Ready {
        entries: entries(3..=3, 1),
        committed_entries: entries(3..=3, 1),
        ..Default::default()
    });

    assert!(eventually(WAIT, || fx.journal.contains(&Event::Append(vec![1, 2]))).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Apply is blocked: no advance, and the next batch is not read yet.
    assert_eq!(fx.journal.count(|e| matches!(e, Event::Advance)), 0);
    assert!(!fx.journal.contains(&Event::Append(vec![3])));

    gate.add_permits(1);
    assert!(eventually(WAIT, || fx.journal.contains(&Event::Append(vec![3]))).await);
    gate.add_permits(1);
    assert!(eventually(WAIT, || {
        fx.journal.count(|e| matches!(e, Event::Advance)) == 2
    })
    .await);

    assert_eq!(
        fx.journal.pipeline_events(),
        vec![
            Event::Append(vec![1, 2]),
            Event::Apply {
                entries: vec![1, 2],
                snapshot: None,
            },
            Event::Advance,
            Event::Append(vec![3]),
            Event::Apply {
                entries: vec![3],
                snapshot: None,
            },
            Event::Advance,
        ]
    );
    fx.node.stop().await.unwrap().0.unwrap();
}

#[tokio::test]
async fn test_shutdown_during_apply_skips_advance() {
    let gate = Arc::new(Semaphore::new(0));
    let sm_gate = gate.clone();
    let fx = start(|engine| engine, move |journal| {
        RecordingStateMachine::new(journal).gated(sm_gate)
    });

    fx.script.push(Ready {
        entries: entries(1..=1, 1),
        committed_entries: entries(1..=1, 1),
        ..Default::default()
    });
    assert!(eventually(WAIT, || fx.journal.contains(&Event::Append(vec![1]))).await);

    let release = gate.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        release.add_permits(1);
    });

    let (outcome, sm) = fx.node.stop().await.unwrap();
    assert!(outcome.is_ok());
    // The in-flight batch was applied once, but never acknowledged.
    assert_eq!(sm.state().get("k1"), Some("v1"));
    assert_eq!(
        fx.journal.count(|e| matches!(e, Event::Apply { .. })),
        1
    );
    assert!(!fx.journal.contains(&Event::Advance));
}

#[tokio::test]
async fn test_durability_fault_stops_the_loop() {
    let fx = default_fixture();
    fx.storage.fail_on(FailPoint::Append);

    let hard_state = HardState {
        term: 1,
        vote: None,
        commit: 1,
    };
    fx.script.push(Ready {
        hard_state: Some(hard_state.clone()),
        entries: entries(1..=1, 1),
        committed_entries: entries(1..=1, 1),
        ..Default::default()
    });

    let (outcome, _sm) = fx.node.join().await.unwrap();
    let err = outcome.err().unwrap();
    assert!(matches!(err, CoordError::Persistence { .. }));
    assert!(err.is_fatal());
    assert_eq!(
        fx.journal.pipeline_events(),
        vec![Event::SetHardState(hard_state)]
    );
}

#[tokio::test]
async fn test_snapshot_fault_stops_before_hard_state() {
    let fx = default_fixture();
    fx.storage.fail_on(FailPoint::ApplySnapshot);

    fx.script.push(Ready {
        hard_state: Some(HardState {
            term: 2,
            vote: None,
            commit: 5,
        }),
        snapshot: Some(Snapshot::new(5, 2, ConfState::default(), Bytes::new())),
        ..Default::default()
    });

    let (outcome, _sm) = fx.node.join().await.unwrap();
    assert!(matches!(outcome, Err(CoordError::Persistence { .. })));
    assert!(fx.journal.pipeline_events().is_empty());
}

#[tokio::test]
async fn test_apply_failure_is_surfaced_without_advance() {
    let fx = start(|engine| engine, |journal| {
        RecordingStateMachine::new(journal).failing()
    });

    fx.script.push(Ready {
        entries: entries(1..=1, 1),
        committed_entries: entries(1..=1, 1),
        ..Default::default()
    });

    let (outcome, _sm) = fx.node.join().await.unwrap();
    assert!(matches!(outcome, Err(CoordError::StateMachine { .. })));
    assert!(!fx.journal.contains(&Event::Advance));
    assert_eq!(fx.journal.pipeline_events(), vec![Event::Append(vec![1])]);
}

#[tokio::test]
async fn test_inbound_messages_are_stepped_and_ticks_delivered() {
    let fx = start(|engine| engine.rejecting_steps(), RecordingStateMachine::new);

    fx.node
        .inbound
        .send(Message::new(MessageType::Heartbeat, NodeId(2), NodeId(1), 1))
        .await
        .unwrap();
    assert!(eventually(WAIT, || fx.journal.contains(&Event::Step(MessageType::Heartbeat))).await);
    assert!(eventually(WAIT, || fx.journal.count(|e| matches!(e, Event::Tick)) >= 2).await);

    // A rejected step is not fatal.
    fx.script.push(Ready::default());
    assert!(eventually(WAIT, || fx.journal.contains(&Event::Advance)).await);
    assert!(!fx.node.is_finished());

    let (outcome, _sm) = fx.node.stop().await.unwrap();
    assert!(outcome.unwrap().stepped().is_empty());
}

#[tokio::test]
async fn test_outbound_messages_are_broadcast_before_advance() {
    let fx = default_fixture();

    let mut remotes = Vec::new();
    for id in [2, 3] {
        let (local, remote) = memory::stream_pair(16);
        fx.node
            .hub
            .add_server_stream(NodeId(id), local.0, local.1)
            .await
            .unwrap();
        remotes.push(remote);
    }
    let hub = fx.node.hub.clone();
    timeout(WAIT, async {
        while hub.peers().await.unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let outbound = vec![
        Message::new(MessageType::Append, NodeId(1), NodeId(2), 4),
        Message::new(MessageType::Append, NodeId(1), NodeId(3), 4),
    ];
    fx.script.push(Ready {
        entries: entries(1..=1, 4),
        messages: outbound.clone(),
        ..Default::default()
    });

    for (_sink, source) in remotes.iter_mut() {
        for expected in &outbound {
            let frame = timeout(WAIT, source.recv()).await.unwrap().unwrap().unwrap();
            assert_eq!(&decode_message(&frame).unwrap(), expected);
        }
    }
    assert!(eventually(WAIT, || fx.journal.contains(&Event::Advance)).await);

    // Frames sent by a peer reach the engine.
    let (sink, _) = &mut remotes[0];
    let reply = Message::new(MessageType::AppendResponse, NodeId(2), NodeId(1), 4);
    sink.send(coord_core::serialization::encode_message(&reply).unwrap())
        .await
        .unwrap();
    assert!(eventually(WAIT, || {
        fx.journal.contains(&Event::Step(MessageType::AppendResponse))
    })
    .await);

    let (outcome, _sm) = fx.node.stop().await.unwrap();
    assert_eq!(outcome.unwrap().stepped(), &[reply]);
}

#[tokio::test]
async fn test_idle_node_stops_promptly() {
    let fx = default_fixture();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (outcome, _sm) = timeout(WAIT, fx.node.stop()).await.unwrap().unwrap();
    assert!(outcome.is_ok());
    assert!(!fx.journal.contains(&Event::Advance));
}

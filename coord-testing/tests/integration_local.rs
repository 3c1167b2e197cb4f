//! Single-voter node end to end: LocalEngine, sled storage and the
//! key-value state machine, across a restart.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use coord_core::messages::{Message, MessageType};
use coord_core::{LogStorage, NodeId, StateRole};
use coord_node::{LocalEngine, NodeConfig};
use coord_storage::SledLogStorage;
use coord_testing::{eventually, Event, Journal, RecordingStateMachine, TestNode};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn config() -> NodeConfig {
    NodeConfig::default()
        .with_tick_interval(Duration::from_millis(10))
        .with_election_ticks(2)
}

fn applied(journal: &Journal, index: u64) -> bool {
    journal.count(|event| match event {
        Event::Apply { entries, .. } => entries.contains(&index),
        _ => false,
    }) > 0
}

fn start(
    storage: Arc<SledLogStorage>,
    journal: &Journal,
) -> TestNode<LocalEngine, RecordingStateMachine> {
    let config = config();
    let engine = LocalEngine::new(NodeId(1), storage.as_ref(), config.election_ticks).unwrap();
    TestNode::start(
        NodeId(1),
        config,
        engine,
        storage,
        RecordingStateMachine::new(journal.clone()),
    )
}

#[tokio::test]
async fn test_proposals_are_persisted_and_applied() {
    init_logging();
    let storage = Arc::new(SledLogStorage::temporary().unwrap());
    let journal = Journal::new();
    let node = start(storage.clone(), &journal);

    // The leadership entry at index 1 is applied once elected.
    assert!(eventually(WAIT, || applied(&journal, 1)).await);
    assert_eq!(storage.hard_state().unwrap().term, 1);

    node.inbound
        .send(Message::propose(
            NodeId(1),
            [Bytes::from("SET color blue"), Bytes::from("SET size xl")],
        ))
        .await
        .unwrap();
    assert!(eventually(WAIT, || applied(&journal, 3)).await);

    assert_eq!(storage.last_index().unwrap(), 3);
    assert_eq!(storage.hard_state().unwrap().commit, 3);
    let stored = storage.entries(2, 4).unwrap();
    assert_eq!(stored[0].payload, "SET color blue");
    assert_eq!(stored[1].payload, "SET size xl");

    let (outcome, sm) = node.stop().await.unwrap();
    let engine = outcome.unwrap();
    assert_eq!(engine.role(), StateRole::Leader);
    assert_eq!(sm.state().get("color"), Some("blue"));
    assert_eq!(sm.state().get("size"), Some("xl"));
    assert_eq!(sm.state().applied_index, 3);
}

#[tokio::test]
async fn test_unsupported_messages_do_not_stop_the_node() {
    init_logging();
    let storage = Arc::new(SledLogStorage::temporary().unwrap());
    let journal = Journal::new();
    let node = start(storage.clone(), &journal);

    node.inbound
        .send(Message::new(MessageType::RequestVote, NodeId(7), NodeId(1), 9))
        .await
        .unwrap();
    assert!(eventually(WAIT, || applied(&journal, 1)).await);

    node.inbound
        .send(Message::propose(NodeId(1), [Bytes::from("SET a 1")]))
        .await
        .unwrap();
    assert!(eventually(WAIT, || applied(&journal, 2)).await);
    assert!(!node.is_finished());

    let (outcome, sm) = node.stop().await.unwrap();
    assert_eq!(outcome.unwrap().term(), 1);
    assert_eq!(sm.state().get("a"), Some("1"));
}

#[tokio::test]
async fn test_restart_replays_the_committed_log() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    {
        let storage = Arc::new(SledLogStorage::open(dir.path()).unwrap());
        let journal = Journal::new();
        let node = start(storage.clone(), &journal);

        assert!(eventually(WAIT, || applied(&journal, 1)).await);
        node.inbound
            .send(Message::propose(
                NodeId(1),
                [Bytes::from("SET color blue"), Bytes::from("DEL color"), Bytes::from("SET shape round")],
            ))
            .await
            .unwrap();
        assert!(eventually(WAIT, || applied(&journal, 4)).await);
        node.stop().await.unwrap().0.unwrap();
    }

    let storage = Arc::new(SledLogStorage::open(dir.path()).unwrap());
    assert_eq!(storage.last_index().unwrap(), 4);
    assert_eq!(storage.hard_state().unwrap().commit, 4);

    let journal = Journal::new();
    let node = start(storage.clone(), &journal);

    // Replay first, then a new term with its own leadership entry.
    assert!(eventually(WAIT, || applied(&journal, 5)).await);
    let applies: Vec<Vec<u64>> = journal
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Apply { entries, .. } => Some(entries),
            _ => None,
        })
        .collect();
    assert_eq!(applies[0], vec![1, 2, 3, 4]);

    let (outcome, sm) = node.stop().await.unwrap();
    assert_eq!(outcome.unwrap().term(), 2);
    assert_eq!(sm.state().get("color"), None);
    assert_eq!(sm.state().get("shape"), Some("round"));
    assert_eq!(storage.term(5).unwrap(), 2);
}

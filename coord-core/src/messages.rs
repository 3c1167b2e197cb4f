use serde::{Deserialize, Serialize};

use crate::{LogEntry, NodeId, Snapshot};

/// Kind of a consensus protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    Propose,
    Append,
    AppendResponse,
    RequestVote,
    RequestVoteResponse,
    Heartbeat,
    HeartbeatResponse,
    Snapshot,
}

/// A consensus engine protocol message.
///
/// The coordination loop and the transport hub never interpret these; they
/// only move them between the engine and the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub log_term: u64,
    pub index: u64,
    pub entries: Vec<LogEntry>,
    pub commit: u64,
    pub snapshot: Option<Snapshot>,
    pub reject: bool,
    pub reject_hint: u64,
}

impl Message {
    pub fn new(msg_type: MessageType, from: NodeId, to: NodeId, term: u64) -> Self {
        Self {
            msg_type,
            from,
            to,
            term,
            ..Default::default()
        }
    }

    /// Local proposal carrying application payloads for the engine to order.
    pub fn propose(from: NodeId, payloads: impl IntoIterator<Item = bytes::Bytes>) -> Self {
        Self {
            msg_type: MessageType::Propose,
            from,
            to: from,
            entries: payloads
                .into_iter()
                .map(|payload| LogEntry {
                    index: 0,
                    term: 0,
                    payload,
                })
                .collect(),
            ..Default::default()
        }
    }
}

//! # Core Types
//!
//! Log entries, durable consensus state and snapshots shared by the storage
//! engine, the coordination loop and the consensus engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node in the cluster.
///
/// `NodeId(0)` is reserved to mean "no node".
///
/// # Examples
///
/// ```rust
/// use coord_core::NodeId;
///
/// let id = NodeId::from(7);
/// assert_eq!(id.value(), 7);
/// assert!(NodeId::NONE.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One record of the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn new(index: u64, term: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            term,
            payload: payload.into(),
        }
    }

    /// Entry without payload, used as a position marker.
    pub fn marker(index: u64, term: u64) -> Self {
        Self {
            index,
            term,
            payload: Bytes::new(),
        }
    }
}

/// Minimal state that must survive a restart so votes and commits are not
/// re-derived. Always overwritten as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: Option<NodeId>,
    pub commit: u64,
}

impl HardState {
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote.is_none() && self.commit == 0
    }
}

/// Cluster membership recorded alongside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfState {
    pub voters: Vec<NodeId>,
    pub learners: Vec<NodeId>,
}

impl ConfState {
    pub fn with_voters(voters: impl IntoIterator<Item = u64>) -> Self {
        Self {
            voters: voters.into_iter().map(NodeId).collect(),
            learners: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub index: u64,
    pub term: u64,
    pub conf_state: ConfState,
}

/// Point-in-time compacted representation of the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Bytes,
}

impl Snapshot {
    pub fn new(index: u64, term: u64, conf_state: ConfState, data: impl Into<Bytes>) -> Self {
        Self {
            metadata: SnapshotMetadata {
                index,
                term,
                conf_state,
            },
            data: data.into(),
        }
    }

    pub fn index(&self) -> u64 {
        self.metadata.index
    }

    pub fn term(&self) -> u64 {
        self.metadata.term
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }
}

/// Role of this node as reported by the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StateRole {
    #[default]
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

/// Volatile state; changes are reported but never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoftState {
    pub leader_id: Option<NodeId>,
    pub role: StateRole,
}

/// Self-description a peer sends to the membership call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub address: String,
}

impl PeerInfo {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerInfoList {
    pub peers: Vec<PeerInfo>,
}

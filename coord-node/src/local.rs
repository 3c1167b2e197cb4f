//! Single-voter consensus engine.
//!
//! `LocalEngine` lets a node run on its own: it elects itself after an
//! election timeout, commits every proposal as soon as it is appended and
//! emits no protocol messages. Multi-node clusters plug a real engine into
//! the same [`ConsensusEngine`] seam.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use coord_core::messages::{Message, MessageType};
use coord_core::{
    ConsensusEngine, CoordError, HardState, LogEntry, LogStorage, NodeId, Ready, Result,
    SoftState, StateRole,
};

pub struct LocalEngine {
    id: NodeId,
    election_ticks: usize,
    elapsed_ticks: usize,

    hard_state: HardState,
    role: StateRole,
    last_index: u64,

    soft_changed: bool,
    hard_changed: bool,
    unstable: Vec<LogEntry>,
    committed: Vec<LogEntry>,
    awaiting_advance: bool,
}

impl LocalEngine {
    /// Restores the engine from `storage`. Entries committed before a
    /// restart are emitted again in the first batch, since the application
    /// state machine does not survive restarts.
    pub fn new<S: LogStorage>(id: NodeId, storage: &S, election_ticks: usize) -> Result<Self> {
        let (hard_state, _conf_state) = storage.initial_state()?;
        let snapshot = storage.snapshot()?;
        let first_index = storage.first_index()?;
        let last_index = storage.last_index()?;

        let replay_from = first_index.max(snapshot.index() + 1);
        let replay_to = hard_state.commit.min(last_index);
        let committed = if replay_from <= replay_to {
            storage.entries(replay_from, replay_to + 1)?
        } else {
            Vec::new()
        };
        if !committed.is_empty() {
            info!(
                "Replaying committed entries [{}, {}] after restart",
                replay_from, replay_to
            );
        }

        Ok(Self {
            id,
            election_ticks: election_ticks.max(1),
            elapsed_ticks: 0,
            hard_state,
            role: StateRole::Follower,
            last_index,
            soft_changed: false,
            hard_changed: false,
            unstable: Vec::new(),
            committed,
            awaiting_advance: false,
        })
    }

    pub fn role(&self) -> StateRole {
        self.role
    }

    pub fn term(&self) -> u64 {
        self.hard_state.term
    }

    fn campaign(&mut self) {
        self.hard_state.term += 1;
        self.hard_state.vote = Some(self.id);
        self.role = StateRole::Leader;
        self.soft_changed = true;
        info!(
            "Node {} elected itself at term {}",
            self.id, self.hard_state.term
        );

        // An empty entry commits everything from earlier terms.
        self.append_committed(vec![Bytes::new()]);
    }

    fn append_committed(&mut self, payloads: Vec<Bytes>) {
        for payload in payloads {
            self.last_index += 1;
            let entry = LogEntry::new(self.last_index, self.hard_state.term, payload);
            self.unstable.push(entry.clone());
            self.committed.push(entry);
        }
        self.hard_state.commit = self.last_index;
        self.hard_changed = true;
    }

    fn take_ready(&mut self) -> Option<Ready> {
        if self.awaiting_advance {
            return None;
        }
        let has_work = self.soft_changed
            || self.hard_changed
            || !self.unstable.is_empty()
            || !self.committed.is_empty();
        if !has_work {
            return None;
        }

        let soft_state = std::mem::take(&mut self.soft_changed).then(|| SoftState {
            leader_id: (self.role == StateRole::Leader).then_some(self.id),
            role: self.role,
        });
        let hard_state = std::mem::take(&mut self.hard_changed).then(|| self.hard_state.clone());

        self.awaiting_advance = true;
        Some(Ready {
            soft_state,
            hard_state,
            snapshot: None,
            entries: std::mem::take(&mut self.unstable),
            committed_entries: std::mem::take(&mut self.committed),
            messages: Vec::new(),
        })
    }
}

#[async_trait]
impl ConsensusEngine for LocalEngine {
    fn tick(&mut self) {
        if self.role == StateRole::Leader {
            return;
        }
        self.elapsed_ticks += 1;
        if self.elapsed_ticks >= self.election_ticks {
            self.elapsed_ticks = 0;
            self.campaign();
        }
    }

    fn step(&mut self, message: Message) -> Result<()> {
        match message.msg_type {
            MessageType::Propose => {
                if self.role != StateRole::Leader {
                    return Err(CoordError::consensus(format!(
                        "Node {} is not the leader, dropping proposal",
                        self.id
                    )));
                }
                if message.entries.is_empty() {
                    return Err(CoordError::consensus("Proposal carries no entries"));
                }
                let count = message.entries.len();
                self.append_committed(message.entries.into_iter().map(|e| e.payload).collect());
                debug!("Committed {} proposed entries up to {}", count, self.last_index);
                Ok(())
            }
            other => Err(CoordError::consensus(format!(
                "Single-voter engine does not accept {:?} from {}",
                other, message.from
            ))),
        }
    }

    async fn ready(&mut self) -> Ready {
        match self.take_ready() {
            Some(ready) => ready,
            None => std::future::pending().await,
        }
    }

    fn advance(&mut self) {
        self.awaiting_advance = false;
    }
}

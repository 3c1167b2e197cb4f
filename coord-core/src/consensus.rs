use async_trait::async_trait;

use crate::messages::Message;
use crate::{HardState, LogEntry, Result, Snapshot, SoftState};

/// One unit of work emitted by the consensus engine.
///
/// The coordination loop persists `snapshot`, `hard_state` and `entries`,
/// applies `committed_entries`, sends `messages`, and only then advances
/// the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ready {
    pub soft_state: Option<SoftState>,
    pub hard_state: Option<HardState>,
    pub snapshot: Option<Snapshot>,
    pub entries: Vec<LogEntry>,
    pub committed_entries: Vec<LogEntry>,
    pub messages: Vec<Message>,
}

impl Ready {
    /// Snapshot carried by this batch, if it is non-empty.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref().filter(|s| !s.is_empty())
    }

    /// Hard state carried by this batch, if it is non-empty.
    pub fn hard_state(&self) -> Option<&HardState> {
        self.hard_state.as_ref().filter(|hs| !hs.is_empty())
    }
}

/// Capability interface of a pluggable consensus engine.
///
/// The node drives the engine but never implements its decision logic;
/// any engine honouring this contract can be substituted.
#[async_trait]
pub trait ConsensusEngine: Send {
    /// Advances the engine's logical clock by one tick.
    fn tick(&mut self);

    /// Feeds an inbound protocol message. Fails on malformed or stale input.
    fn step(&mut self, message: Message) -> Result<()>;

    /// Resolves once a [`Ready`] batch is available.
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose the batch. No further batch is produced until [`advance`] is
    /// called.
    ///
    /// [`advance`]: ConsensusEngine::advance
    async fn ready(&mut self) -> Ready;

    /// Acknowledges that the last batch was fully persisted, applied and sent.
    fn advance(&mut self);
}

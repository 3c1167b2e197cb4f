//! Consensus engine whose Ready batches are fed by the test.

use async_trait::async_trait;
use tokio::sync::mpsc;

use coord_core::messages::Message;
use coord_core::{ConsensusEngine, CoordError, Ready, Result};

use crate::journal::{Event, Journal};

/// Feeds batches to a [`ScriptedEngine`].
#[derive(Clone)]
pub struct Script {
    batches: mpsc::UnboundedSender<Ready>,
}

impl Script {
    pub fn push(&self, ready: Ready) {
        // The engine is gone once the node stopped.
        let _ = self.batches.send(ready);
    }
}

/// Engine that replays scripted [`Ready`] batches and journals every call.
///
/// Like a real engine it yields no further batch until the previous one was
/// advanced. Steps are accepted unless `reject_steps` is set.
pub struct ScriptedEngine {
    batches: mpsc::UnboundedReceiver<Ready>,
    journal: Journal,
    awaiting_advance: bool,
    reject_steps: bool,
    stepped: Vec<Message>,
}

impl ScriptedEngine {
    pub fn new(journal: Journal) -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                batches: rx,
                journal,
                awaiting_advance: false,
                reject_steps: false,
                stepped: Vec::new(),
            },
            Script { batches: tx },
        )
    }

    pub fn rejecting_steps(mut self) -> Self {
        self.reject_steps = true;
        self
    }

    /// Messages stepped so far.
    pub fn stepped(&self) -> &[Message] {
        &self.stepped
    }
}

#[async_trait]
impl ConsensusEngine for ScriptedEngine {
    fn tick(&mut self) {
        self.journal.record(Event::Tick);
    }

    fn step(&mut self, message: Message) -> Result<()> {
        self.journal.record(Event::Step(message.msg_type));
        if self.reject_steps {
            return Err(CoordError::consensus("stale message"));
        }
        self.stepped.push(message);
        Ok(())
    }

    async fn ready(&mut self) -> Ready {
        if !self.awaiting_advance {
            if let Some(ready) = self.batches.recv().await {
                self.awaiting_advance = true;
                return ready;
            }
        }
        std::future::pending().await
    }

    fn advance(&mut self) {
        self.journal.record(Event::Advance);
        self.awaiting_advance = false;
    }
}

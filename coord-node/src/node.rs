//! # Node Coordination Loop
//!
//! Drives a [`ConsensusEngine`]: ticks it, steps it with inbound messages
//! and processes every [`Ready`] batch in a fixed order:
//!
//! 1. persist the snapshot
//! 2. persist the hard state
//! 3. append the new entries
//! 4. hand the committed entries to the task pipeline
//! 5. broadcast the outbound messages through the hub
//! 6. wait for the task to complete, then advance the engine
//!
//! A failure in steps 1 to 3 is fatal and ends the loop with an error.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use coord_core::messages::Message;
use coord_core::shutdown;
use coord_core::{
    ConsensusEngine, CoordError, HardState, LogEntry, LogStorage, NodeId, Ready, Result,
    Snapshot, SoftState, StateRole,
};
use coord_network::HubHandle;

use crate::config::NodeConfig;
use crate::task::Task;

/// What became of one Ready batch.
enum Outcome {
    Advanced,
    Interrupted,
}

pub struct Node<E, S>
where
    E: ConsensusEngine,
    S: LogStorage + 'static,
{
    id: NodeId,
    config: NodeConfig,
    engine: E,
    storage: Arc<S>,
    hub: HubHandle,
    inbound: mpsc::Receiver<Message>,
    tasks: mpsc::Sender<Task>,
    role: StateRole,
    leader: Option<NodeId>,
}

impl<E, S> Node<E, S>
where
    E: ConsensusEngine,
    S: LogStorage + 'static,
{
    pub fn new(
        id: NodeId,
        config: NodeConfig,
        engine: E,
        storage: Arc<S>,
        hub: HubHandle,
        inbound: mpsc::Receiver<Message>,
        tasks: mpsc::Sender<Task>,
    ) -> Self {
        Self {
            id,
            config,
            engine,
            storage,
            hub,
            inbound,
            tasks,
            role: StateRole::Follower,
            leader: None,
        }
    }

    /// Runs until `shutdown` turns true or a fatal error occurs. Returns the
    /// engine so callers can inspect it after a clean stop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<E> {
        info!("Starting coordination loop for node {}", self.id);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => self.engine.tick(),
                message = self.inbound.recv(), if inbound_open => match message {
                    Some(message) => {
                        let msg_type = message.msg_type;
                        if let Err(e) = self.engine.step(message) {
                            debug!("Engine rejected {:?}: {}", msg_type, e);
                        }
                    }
                    None => {
                        debug!("Inbound queue closed");
                        inbound_open = false;
                    }
                },
                ready = self.engine.ready() => {
                    match self.handle_ready(ready, &mut shutdown).await? {
                        Outcome::Advanced => {}
                        Outcome::Interrupted => break,
                    }
                }
            }
        }

        info!("Coordination loop for node {} stopped", self.id);
        Ok(self.engine)
    }

    async fn handle_ready(
        &mut self,
        ready: Ready,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Outcome> {
        if let Some(soft_state) = &ready.soft_state {
            self.observe(soft_state);
        }

        let Ready {
            hard_state,
            snapshot,
            entries,
            committed_entries,
            messages,
            ..
        } = ready;
        let snapshot = snapshot.filter(|s| !s.is_empty());
        let hard_state = hard_state.filter(|hs| !hs.is_empty());
        self.persist(snapshot.clone(), hard_state, entries).await?;

        let (task, completion) = Task::new(committed_entries, snapshot);

        tokio::select! {
            _ = shutdown::requested(shutdown) => return Ok(Outcome::Interrupted),
            sent = self.tasks.send(task) => {
                if sent.is_err() {
                    return Err(CoordError::internal("Task pipeline stopped"));
                }
            }
        }

        for message in messages {
            let sent = tokio::select! {
                _ = shutdown::requested(shutdown) => return Ok(Outcome::Interrupted),
                sent = self.hub.send_message(message) => sent,
            };
            if let Err(e) = sent {
                warn!("Failed to hand message to the peer hub: {}", e);
            }
        }

        let outcome = tokio::select! {
            _ = shutdown::requested(shutdown) => return Ok(Outcome::Interrupted),
            outcome = completion => outcome,
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Committed entries could not be applied: {}", e);
                return Err(match e {
                    CoordError::StateMachine { .. } => e,
                    other => CoordError::state_machine(other.to_string()),
                });
            }
            Err(_) => return Err(CoordError::internal("Task dropped before completion")),
        }

        self.engine.advance();
        Ok(Outcome::Advanced)
    }

    /// Steps 1 to 3 of a Ready batch. Storage writes are synchronous and
    /// flushed, so they run on the blocking pool.
    async fn persist(
        &self,
        snapshot: Option<Snapshot>,
        hard_state: Option<HardState>,
        entries: Vec<LogEntry>,
    ) -> Result<()> {
        if snapshot.is_none() && hard_state.is_none() && entries.is_empty() {
            return Ok(());
        }

        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            if let Some(snapshot) = &snapshot {
                storage
                    .apply_snapshot(snapshot)
                    .map_err(|e| durability_fault("snapshot", e))?;
            }
            if let Some(hard_state) = &hard_state {
                storage
                    .set_hard_state(hard_state)
                    .map_err(|e| durability_fault("hard state", e))?;
            }
            if !entries.is_empty() {
                storage
                    .append(&entries)
                    .map_err(|e| durability_fault("entries", e))?;
            }
            Ok::<_, CoordError>(())
        })
        .await
        .map_err(|e| {
            durability_fault(
                "Ready batch",
                CoordError::persistence(format!("Storage task failed: {}", e)),
            )
        })?
    }

    fn observe(&mut self, soft_state: &SoftState) {
        if soft_state.leader_id != self.leader {
            match soft_state.leader_id {
                Some(leader) => info!("Node {} sees leader {}", self.id, leader),
                None => info!("Node {} lost its leader", self.id),
            }
            self.leader = soft_state.leader_id;
        }
        if soft_state.role != self.role {
            if soft_state.role == StateRole::Leader {
                info!("Node {} became leader", self.id);
            } else {
                debug!("Node {} is now {:?}", self.id, soft_state.role);
            }
            self.role = soft_state.role;
        }
    }
}

fn durability_fault(what: &str, e: CoordError) -> CoordError {
    error!("Failed to persist {}: {}", what, e);
    e
}

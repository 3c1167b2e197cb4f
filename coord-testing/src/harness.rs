//! Wires one node (hub, task pipeline and coordination loop) for tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use coord_core::messages::Message;
use coord_core::shutdown;
use coord_core::state_machine::StateMachine;
use coord_core::{ConsensusEngine, CoordError, LogStorage, NodeId, Result};
use coord_network::{Hub, HubHandle};
use coord_node::{Node, NodeConfig, TaskRunner};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestNode<E, M> {
    pub id: NodeId,
    pub hub: HubHandle,
    /// Queue the coordination loop steps the engine from.
    pub inbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    node: JoinHandle<Result<E>>,
    runner: JoinHandle<M>,
    hub_task: JoinHandle<()>,
}

impl<E, M> TestNode<E, M>
where
    E: ConsensusEngine + Sync + 'static,
    M: StateMachine,
{
    pub fn start<S>(
        id: NodeId,
        config: NodeConfig,
        engine: E,
        storage: Arc<S>,
        state_machine: M,
    ) -> Self
    where
        S: LogStorage + 'static,
    {
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size);
        let (hub, hub_task) = Hub::spawn(inbound_tx.clone(), shutdown_rx.clone());
        let (tasks, runner) =
            TaskRunner::spawn(state_machine, config.task_queue_size, shutdown_rx.clone());

        let node = Node::new(id, config, engine, storage, hub.clone(), inbound_rx, tasks);
        let node = tokio::spawn(node.run(shutdown_rx));

        Self {
            id,
            hub,
            inbound: inbound_tx,
            shutdown: shutdown_tx,
            node,
            runner,
            hub_task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.node.is_finished()
    }

    /// Requests shutdown and waits for every task of the node.
    pub async fn stop(self) -> Result<(Result<E>, M)> {
        let _ = self.shutdown.send(true);
        self.join().await
    }

    /// Waits for the coordination loop to end on its own, then stops the
    /// remaining tasks.
    pub async fn join(self) -> Result<(Result<E>, M)> {
        let outcome = join_task(self.node).await?;
        let _ = self.shutdown.send(true);
        let state_machine = join_task(self.runner).await?;
        join_task(self.hub_task).await?;
        Ok((outcome, state_machine))
    }
}

async fn join_task<T>(handle: JoinHandle<T>) -> Result<T> {
    timeout(STOP_TIMEOUT, handle)
        .await
        .map_err(|_| CoordError::internal("task did not stop in time"))?
        .map_err(|e| CoordError::internal(format!("task failed: {}", e)))
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let waited = timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.is_ok()
}

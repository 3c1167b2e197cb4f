//! # Coord Node
//!
//! The coordination loop that makes this process a durable, networked
//! participant of a replicated log.
//!
//! ## Key Components
//!
//! - **Node**: drives the consensus engine and enforces durability-before-commit ordering
//! - **TaskRunner**: applies committed batches to the state machine, one at a time
//! - **NodeConfig**: tick interval and queue sizes
//! - **LocalEngine**: single-voter engine for standalone deployments
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use coord_core::{shutdown, state_machine::InMemoryStateMachine, NodeId};
//! use coord_network::Hub;
//! use coord_node::{LocalEngine, Node, NodeConfig, TaskRunner};
//! use coord_storage::SledLogStorage;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> coord_core::Result<()> {
//!     let id = NodeId(1);
//!     let config = NodeConfig::default();
//!     let storage = Arc::new(SledLogStorage::open("/tmp/coord-node")?);
//!     let (shutdown_tx, shutdown_rx) = shutdown::channel();
//!
//!     let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size);
//!     let (hub, _hub_task) = Hub::spawn(inbound_tx, shutdown_rx.clone());
//!     let (tasks, _runner) =
//!         TaskRunner::spawn(InMemoryStateMachine::new(), config.task_queue_size, shutdown_rx.clone());
//!     let engine = LocalEngine::new(id, storage.as_ref(), config.election_ticks)?;
//!
//!     let node = Node::new(id, config, engine, storage, hub, inbound_rx, tasks);
//!     let handle = tokio::spawn(node.run(shutdown_rx));
//!
//!     shutdown_tx.send(true).ok();
//!     handle.await.ok();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod local;
pub mod node;
pub mod task;

pub use config::NodeConfig;
pub use local::LocalEngine;
pub use node::Node;
pub use task::{Task, TaskCompletion, TaskRunner};

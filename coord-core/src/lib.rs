//! # Coord Core
//!
//! Types and capability traits shared by every part of the coordinator node.
//!
//! The node makes itself a durable, networked participant of a replicated
//! log without implementing the consensus algorithm. This crate holds the
//! seams between the pieces:
//!
//! - **Types**: log entries, hard state, snapshots, peer descriptions
//! - **Messages**: the consensus protocol frame moved between engine and wire
//! - **LogStorage**: the durability contract the consensus engine depends on
//! - **ConsensusEngine**: the tick/step/ready/advance capability of a pluggable engine
//! - **StateMachine**: the application that committed entries are applied to
//! - **Frame transport**: the bidirectional stream abstraction peers talk over
//! - **Error Handling**: one error enum with recoverable/fatal classification
//!
//! ```rust
//! use coord_core::{state_machine::{InMemoryStateMachine, StateMachine}, LogEntry};
//!
//! # tokio_test::block_on(async {
//! let mut sm = InMemoryStateMachine::new();
//! sm.apply(&[LogEntry::new(1, 1, "SET color blue")], None).await.unwrap();
//! assert_eq!(sm.get("color"), Some("blue"));
//! # });
//! ```

pub mod consensus;
pub mod error;
pub mod messages;
pub mod network;
pub mod serialization;
pub mod shutdown;
pub mod state_machine;
pub mod storage;
pub mod types;

pub use consensus::{ConsensusEngine, Ready};
pub use error::*;
pub use storage::LogStorage;
pub use types::*;

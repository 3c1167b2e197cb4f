//! # Coord Testing
//!
//! Test doubles and wiring for exercising the coordinator node without a
//! real consensus engine:
//!
//! - [`ScriptedEngine`]: replays Ready batches pushed through a [`Script`]
//! - [`RecordingStorage`] / [`RecordingStateMachine`]: journal every mutation
//!   into a shared [`Journal`], with injectable failures
//! - [`TestNode`]: starts hub, task pipeline and coordination loop together

pub mod harness;
pub mod journal;
pub mod recording;
pub mod scripted;

pub use harness::{eventually, TestNode};
pub use journal::{Event, Journal};
pub use recording::{FailPoint, RecordingStateMachine, RecordingStorage};
pub use scripted::{Script, ScriptedEngine};

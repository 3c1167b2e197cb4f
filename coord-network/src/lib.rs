//! # Coord Network
//!
//! Peer transport for the coordinator node.
//!
//! - [`Hub`]: actor owning the live peer set, broadcasting outbound protocol
//!   messages and forwarding decoded inbound ones to the coordination loop
//! - [`tcp`]: length-prefixed TCP frames, the `EmitRaftStep` stream call, the
//!   `Register` membership call and the accepting [`CoordService`]
//! - [`memory`]: channel-backed streams for running nodes in one process

pub mod hub;
pub mod memory;
pub mod tcp;

pub use hub::{Hub, HubHandle};
pub use memory::{MemoryConnection, MemoryListener};
pub use tcp::{register, CoordService, TcpConnection, TcpTransportConfig};

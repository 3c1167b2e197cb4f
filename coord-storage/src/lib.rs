//! # Coord Storage
//!
//! Durable log storage for the coordinator node.
//!
//! [`SledLogStorage`] keeps log entries, the hard state and the current
//! snapshot in a single embedded keyspace. Every mutation is one
//! transaction, and every stored record carries a checksum so corruption
//! is reported instead of silently decoded.
//!
//! ## Example
//!
//! ```rust
//! use coord_core::{LogEntry, LogStorage};
//! use coord_storage::SledLogStorage;
//!
//! let storage = SledLogStorage::temporary().unwrap();
//! storage
//!     .append(&[LogEntry::new(1, 1, "SET a 1"), LogEntry::new(2, 1, "SET b 2")])
//!     .unwrap();
//!
//! assert_eq!(storage.first_index().unwrap(), 1);
//! assert_eq!(storage.last_index().unwrap(), 2);
//! assert_eq!(storage.term(2).unwrap(), 1);
//! ```

pub mod sled_store;

pub use sled_store::SledLogStorage;

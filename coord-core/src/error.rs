//! # Error Types
//!
//! Error handling for the coordinator node: log storage, peer transport,
//! the coordination loop and the task pipeline all report through
//! [`CoordError`].

use thiserror::Error;

/// Error types that can occur while this node participates in consensus.
///
/// # Error Categories
///
/// - **Retention Errors**: `Compacted`, `Unavailable`, `SnapshotOutOfDate`.
///   These are handed back to the consensus engine, which reacts to them
///   (for example by sending a snapshot to a lagging peer). Never fatal.
/// - **Invariant Violations**: `OutOfBounds`, `StateCorruption`. These must
///   never happen in correct operation and stop the node.
/// - **Rejected Writes**: `NonContiguous`, `LogGap`. Nothing was written.
/// - **Durability Errors**: `Persistence`. Fatal inside the coordination loop.
/// - **Transport Errors**: `Network`. Reduce connectivity, never fatal.
///
/// # Examples
///
/// ```rust
/// use coord_core::CoordError;
///
/// let error = CoordError::Compacted;
/// assert!(error.is_recoverable());
/// assert!(!error.is_fatal());
/// ```
#[derive(Error, Debug)]
pub enum CoordError {
    /// Requested index lies before the first retained entry
    #[error("requested index is unavailable due to compaction")]
    Compacted,

    /// Requested entry is not present in the log
    #[error("requested entry at index is unavailable")]
    Unavailable,

    /// Requested snapshot index is not newer than the stored snapshot
    #[error("requested index is older than the existing snapshot")]
    SnapshotOutOfDate,

    /// Request exceeds the retained range; never happens in correct operation
    #[error("{operation} {index} is out of bound lastindex({last_index})")]
    OutOfBounds {
        operation: &'static str,
        index: u64,
        last_index: u64,
    },

    /// Entries handed to append are not index-contiguous among themselves
    #[error("entry {position} is not continuous (expected {expected} vs {actual})")]
    NonContiguous {
        position: usize,
        expected: u64,
        actual: u64,
    },

    /// Appended batch would leave a hole after the stored log
    #[error("first entry index {first} is not contiguous to last entry stored {last_index}")]
    LogGap { first: u64, last_index: u64 },

    /// A stored record failed its checksum or could not be decoded
    #[error("State corruption detected: {details}")]
    StateCorruption { details: String },

    /// Durable storage operation failure
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Peer transport failure
    #[error("Network error: {message}")]
    Network { message: String },

    /// Application state machine failure
    #[error("State machine error: {message}")]
    StateMachine { message: String },

    /// Consensus engine rejected an input
    #[error("Consensus error: {message}")]
    Consensus { message: String },

    /// Encoding or decoding of a record or frame failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File system or socket I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The shutdown signal was observed while waiting
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the coordinator node.
pub type Result<T> = std::result::Result<T, CoordError>;

impl CoordError {
    /// Creates a new persistence error with the given message.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a new network error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use coord_core::CoordError;
    ///
    /// let error = CoordError::network("Connection reset");
    /// assert!(!error.is_fatal());
    /// ```
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new state machine error with the given message.
    pub fn state_machine(message: impl Into<String>) -> Self {
        Self::StateMachine {
            message: message.into(),
        }
    }

    /// Creates a new consensus error with the given message.
    pub fn consensus(message: impl Into<String>) -> Self {
        Self::Consensus {
            message: message.into(),
        }
    }

    /// Creates a new serialization error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new corruption error with the given details.
    pub fn corruption(details: impl Into<String>) -> Self {
        Self::StateCorruption {
            details: details.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Out-of-retention lookups the consensus engine is expected to handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Compacted | Self::Unavailable | Self::SnapshotOutOfDate
        )
    }

    /// Errors after which the node must stop rather than risk diverging
    /// from durable storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use coord_core::CoordError;
    ///
    /// let error = CoordError::OutOfBounds {
    ///     operation: "compact",
    ///     index: 9,
    ///     last_index: 5,
    /// };
    /// assert!(error.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. }
                | Self::StateCorruption { .. }
                | Self::Persistence { .. }
                | Self::Io(_)
        )
    }
}

impl From<bincode::Error> for CoordError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

use bytes::Bytes;

use crate::{ConfState, HardState, LogEntry, Result, Snapshot};

/// Durability and retrieval contract the consensus engine depends on.
///
/// Implementations run every mutation inside their own single-writer
/// transaction and give readers a consistent view, so callers never lock
/// around these methods.
///
/// Stored entries are index-contiguous within `[first_index, last_index]`;
/// an empty log has `first_index == last_index + 1`.
pub trait LogStorage: Send + Sync {
    /// Stored hard state together with the current snapshot's membership.
    fn initial_state(&self) -> Result<(HardState, ConfState)>;

    fn first_index(&self) -> Result<u64>;

    fn last_index(&self) -> Result<u64>;

    /// Term of entry `index`; `Unavailable` outside `[first_index, last_index]`.
    fn term(&self, index: u64) -> Result<u64>;

    /// Entries in the half-open range `[lo, hi)`.
    ///
    /// Fails with `Compacted` if `lo < first_index` and with `OutOfBounds`
    /// if `hi > last_index + 1`.
    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<LogEntry>>;

    /// Current snapshot, empty if none was ever applied.
    fn snapshot(&self) -> Result<Snapshot>;

    fn hard_state(&self) -> Result<HardState>;

    /// Replaces the stored hard state atomically.
    fn set_hard_state(&self, hard_state: &HardState) -> Result<()>;

    /// Persists `entries`, overwriting any overlap with the stored log.
    ///
    /// The batch must be index-contiguous. A prefix lying before
    /// `first_index` is discarded; a batch lying entirely before it is a no-op.
    fn append(&self, entries: &[LogEntry]) -> Result<()>;

    /// Discards all entries below `cut_index`, which becomes `first_index`.
    fn compact(&self, cut_index: u64) -> Result<()>;

    /// Builds a snapshot at `index` without persisting it.
    fn create_snapshot(
        &self,
        index: u64,
        conf_state: Option<&ConfState>,
        data: Bytes,
    ) -> Result<Snapshot>;

    /// Discards the whole log and installs `snapshot` as ground truth.
    fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

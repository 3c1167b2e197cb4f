use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::path::Path;
use tracing::{debug, info};

use coord_core::serialization::{BinarySerializer, MessageSerializer};
use coord_core::{
    ConfState, CoordError, HardState, LogEntry, LogStorage, NodeId, Result, Snapshot,
};

/// Name of the tree holding the whole log keyspace.
pub(crate) const LOG_TREE: &str = "conf-raft";

const FIRST_INDEX: &[u8] = b"first-index";
const LAST_INDEX: &[u8] = b"last-index";
const HARD_STATE: &[u8] = b"hardstate";
const SNAPSHOT: &[u8] = b"snapshot";
const NODE_ID: &[u8] = b"node-id";
const ENTRY_PREFIX: &[u8] = b"entry-";

type TxResult<T> = ConflictableTransactionResult<T, CoordError>;

/// Entry keys embed the index big-endian so keys sort by index.
pub(crate) fn entry_key(index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ENTRY_PREFIX.len() + 8);
    key.extend_from_slice(ENTRY_PREFIX);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn decode_u64(key: &[u8], raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        CoordError::corruption(format!(
            "{} has an invalid value on the store ({} bytes)",
            String::from_utf8_lossy(key),
            raw.len()
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Stored records are `crc32 (4 bytes, big-endian) || bincode payload`.
fn seal<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let payload = BinarySerializer.serialize(record)?;
    let mut sealed = Vec::with_capacity(4 + payload.len());
    sealed.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    sealed.extend_from_slice(&payload);
    Ok(sealed)
}

fn unseal<T>(key: &[u8], raw: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if raw.len() < 4 {
        return Err(CoordError::corruption(format!(
            "record {} is truncated",
            String::from_utf8_lossy(key)
        )));
    }
    let (checksum, payload) = raw.split_at(4);
    let expected = u32::from_be_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(CoordError::corruption(format!(
            "checksum mismatch on record {}: expected {}, got {}",
            String::from_utf8_lossy(key),
            expected,
            actual
        )));
    }
    BinarySerializer.deserialize(payload).map_err(|e| {
        CoordError::corruption(format!(
            "undecodable record {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
    })
}

fn abort<T>(err: CoordError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn lift<T>(result: Result<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

fn from_tx_error(err: TransactionError<CoordError>) -> CoordError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => {
            CoordError::persistence(format!("Log storage transaction failed: {}", err))
        }
    }
}

/// Retained entry range. An empty log has `first == last + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    first: u64,
    last: u64,
}

impl Bounds {
    fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

fn read_u64(tx: &TransactionalTree, key: &[u8]) -> TxResult<Option<u64>> {
    match tx.get(key)? {
        Some(raw) => lift(decode_u64(key, &raw)).map(Some),
        None => Ok(None),
    }
}

fn write_u64(tx: &TransactionalTree, key: &[u8], value: u64) -> TxResult<()> {
    tx.insert(key, &value.to_be_bytes()[..])?;
    Ok(())
}

fn read_bounds(tx: &TransactionalTree) -> TxResult<Bounds> {
    let first = read_u64(tx, FIRST_INDEX)?.unwrap_or(1);
    let last = read_u64(tx, LAST_INDEX)?.unwrap_or(0);
    if first > last.saturating_add(1) {
        return abort(CoordError::corruption(format!(
            "first index {} is beyond last index {}",
            first, last
        )));
    }
    Ok(Bounds { first, last })
}

fn read_record<T>(tx: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    match tx.get(key)? {
        Some(raw) => lift(unseal(key, &raw)).map(Some),
        None => Ok(None),
    }
}

fn read_entry(tx: &TransactionalTree, index: u64) -> TxResult<Option<LogEntry>> {
    read_record(tx, &entry_key(index))
}

fn read_snapshot(tx: &TransactionalTree) -> TxResult<Snapshot> {
    Ok(read_record(tx, SNAPSHOT)?.unwrap_or_default())
}

/// Log storage engine backed by an embedded `sled` database.
///
/// Every mutation runs in one sled transaction and is flushed to disk
/// before returning, so a successful call is durable. Reads also run in a
/// transaction and therefore see a consistent view of the bounds and the
/// entries they cover.
///
/// Persisted layout, all in one tree:
///
/// | key           | value                                  |
/// |---------------|----------------------------------------|
/// | `first-index` | u64, fixed width                       |
/// | `last-index`  | u64, fixed width                       |
/// | `hardstate`   | checksummed [`HardState`]              |
/// | `snapshot`    | checksummed [`Snapshot`]               |
/// | `node-id`     | u64, fixed width                       |
/// | `entry-<idx>` | checksummed [`LogEntry`], one per index |
#[derive(Debug, Clone)]
pub struct SledLogStorage {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledLogStorage {
    /// Opens (or creates) the storage at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            CoordError::persistence(format!(
                "Failed to open log storage at {}: {}",
                path.display(),
                e
            ))
        })?;
        let storage = Self::from_db(db)?;
        info!("Opened log storage at {}", path.display());
        Ok(storage)
    }

    /// Storage living in a temporary location that is removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CoordError::persistence(format!("Failed to open temporary storage: {}", e)))?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db
            .open_tree(LOG_TREE)
            .map_err(|e| CoordError::persistence(format!("Failed to open log tree: {}", e)))?;
        Ok(Self { db, tree })
    }

    fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: Fn(&TransactionalTree) -> TxResult<T>,
    {
        self.tree.transaction(op).map_err(from_tx_error)
    }

    fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: Fn(&TransactionalTree) -> TxResult<T>,
    {
        let out = self.tree.transaction(op).map_err(from_tx_error)?;
        self.db
            .flush()
            .map_err(|e| CoordError::persistence(format!("Failed to flush log storage: {}", e)))?;
        Ok(out)
    }

    /// Identity this node was started with, if one was ever recorded.
    pub fn node_id(&self) -> Result<Option<NodeId>> {
        Ok(self.read(|tx| read_u64(tx, NODE_ID))?.map(NodeId))
    }

    pub fn set_node_id(&self, id: NodeId) -> Result<()> {
        self.write(|tx| write_u64(tx, NODE_ID, id.value()))
    }
}

impl LogStorage for SledLogStorage {
    fn initial_state(&self) -> Result<(HardState, ConfState)> {
        self.read(|tx| {
            let hard_state = read_record(tx, HARD_STATE)?.unwrap_or_default();
            let snapshot = read_snapshot(tx)?;
            Ok((hard_state, snapshot.metadata.conf_state))
        })
    }

    fn first_index(&self) -> Result<u64> {
        self.read(|tx| Ok(read_bounds(tx)?.first))
    }

    fn last_index(&self) -> Result<u64> {
        self.read(|tx| Ok(read_bounds(tx)?.last))
    }

    fn term(&self, index: u64) -> Result<u64> {
        self.read(|tx| {
            let bounds = read_bounds(tx)?;
            if index < bounds.first || index > bounds.last {
                return abort(CoordError::Unavailable);
            }
            match read_entry(tx, index)? {
                Some(entry) => Ok(entry.term),
                None => abort(CoordError::Unavailable),
            }
        })
    }

    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<LogEntry>> {
        self.read(|tx| {
            let bounds = read_bounds(tx)?;
            if lo < bounds.first {
                return abort(CoordError::Compacted);
            }
            if lo >= hi {
                return Ok(Vec::new());
            }
            if hi > bounds.last.saturating_add(1) {
                return abort(CoordError::OutOfBounds {
                    operation: "entries hi",
                    index: hi,
                    last_index: bounds.last,
                });
            }

            let mut entries = Vec::with_capacity(hi.saturating_sub(lo) as usize);
            for index in lo..hi {
                match read_entry(tx, index)? {
                    Some(entry) => entries.push(entry),
                    None => {
                        return abort(CoordError::corruption(format!(
                            "entry {} missing inside retained range [{}, {}]",
                            index, bounds.first, bounds.last
                        )))
                    }
                }
            }
            Ok(entries)
        })
    }

    fn snapshot(&self) -> Result<Snapshot> {
        self.read(read_snapshot)
    }

    fn hard_state(&self) -> Result<HardState> {
        self.read(|tx| Ok(read_record(tx, HARD_STATE)?.unwrap_or_default()))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn set_hard_state(&self, hard_state: &HardState) -> Result<()> {
        let sealed = seal(hard_state)?;
        self.write(|tx| {
            tx.insert(HARD_STATE, sealed.as_slice())?;
            Ok(())
        })
    }

    #[tracing::instrument(level = "debug", skip(self, entries), fields(count = entries.len()))]
    fn append(&self, entries: &[LogEntry]) -> Result<()> {
        let Some(head) = entries.first() else {
            return Ok(());
        };
        let batch_first = head.index;
        let Some(batch_last) = batch_first.checked_add(entries.len() as u64 - 1) else {
            return Err(CoordError::OutOfBounds {
                operation: "append",
                index: batch_first,
                last_index: u64::MAX,
            });
        };
        for (position, entry) in entries.iter().enumerate().skip(1) {
            let expected = batch_first + position as u64;
            if entry.index != expected {
                return Err(CoordError::NonContiguous {
                    position,
                    expected,
                    actual: entry.index,
                });
            }
        }
        let records = entries
            .iter()
            .map(|entry| Ok((entry.index, seal(entry)?)))
            .collect::<Result<Vec<_>>>()?;

        let written = self.write(|tx| {
            let bounds = read_bounds(tx)?;
            let mut skip = 0;
            if !bounds.is_empty() {
                if batch_last < bounds.first {
                    return Ok(false);
                }
                if batch_first > bounds.last.saturating_add(1) {
                    return abort(CoordError::LogGap {
                        first: batch_first,
                        last_index: bounds.last,
                    });
                }
                // Drop the prefix that was already compacted away.
                skip = bounds.first.saturating_sub(batch_first) as usize;
            }

            for (index, record) in &records[skip..] {
                tx.insert(entry_key(*index), record.as_slice())?;
            }
            // Overwriting a suffix truncates whatever followed it.
            if !bounds.is_empty() {
                if batch_last < bounds.last {
                    for index in batch_last + 1..=bounds.last {
                        tx.remove(entry_key(index))?;
                    }
                }
            } else {
                write_u64(tx, FIRST_INDEX, batch_first)?;
            }
            write_u64(tx, LAST_INDEX, batch_last)?;
            Ok(true)
        })?;

        if written {
            debug!("Appended entries up to index {}", batch_last);
        } else {
            debug!(
                "Ignored append of [{}, {}] below first index",
                batch_first, batch_last
            );
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn compact(&self, cut_index: u64) -> Result<()> {
        self.write(|tx| {
            let bounds = read_bounds(tx)?;
            if cut_index <= bounds.first {
                return abort(CoordError::Compacted);
            }
            if cut_index > bounds.last {
                return abort(CoordError::OutOfBounds {
                    operation: "compact",
                    index: cut_index,
                    last_index: bounds.last,
                });
            }
            for index in bounds.first..cut_index {
                tx.remove(entry_key(index))?;
            }
            write_u64(tx, FIRST_INDEX, cut_index)
        })?;
        debug!("Compacted log below index {}", cut_index);
        Ok(())
    }

    fn create_snapshot(
        &self,
        index: u64,
        conf_state: Option<&ConfState>,
        data: Bytes,
    ) -> Result<Snapshot> {
        self.read(|tx| {
            let current = read_snapshot(tx)?;
            if current.index() >= index {
                return abort(CoordError::SnapshotOutOfDate);
            }
            let bounds = read_bounds(tx)?;
            if index > bounds.last {
                return abort(CoordError::OutOfBounds {
                    operation: "snapshot",
                    index,
                    last_index: bounds.last,
                });
            }
            let entry = match read_entry(tx, index)? {
                Some(entry) if index >= bounds.first => entry,
                _ => return abort(CoordError::Unavailable),
            };
            let conf_state = conf_state
                .cloned()
                .unwrap_or_else(|| current.metadata.conf_state.clone());
            Ok(Snapshot::new(index, entry.term, conf_state, data.clone()))
        })
    }

    #[tracing::instrument(level = "debug", skip(self, snapshot), fields(index = snapshot.index(), term = snapshot.term()))]
    fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }
        let index = snapshot.index();
        let sealed_snapshot = seal(snapshot)?;
        let sealed_marker = seal(&LogEntry::marker(index, snapshot.term()))?;

        self.write(|tx| {
            let current = read_snapshot(tx)?;
            if !current.is_empty() && index <= current.index() {
                return abort(CoordError::SnapshotOutOfDate);
            }
            let bounds = read_bounds(tx)?;
            for stale in bounds.first..=bounds.last {
                tx.remove(entry_key(stale))?;
            }
            tx.insert(SNAPSHOT, sealed_snapshot.as_slice())?;
            tx.insert(entry_key(index), sealed_marker.as_slice())?;
            write_u64(tx, FIRST_INDEX, index)?;
            write_u64(tx, LAST_INDEX, index)
        })?;
        info!("Installed snapshot at index {}", index);
        Ok(())
    }
}

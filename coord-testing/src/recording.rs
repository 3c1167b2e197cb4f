//! Storage and state machine doubles that journal every mutation.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use coord_core::state_machine::{InMemoryStateMachine, StateMachine};
use coord_core::{
    ConfState, CoordError, HardState, LogEntry, LogStorage, Result, Snapshot,
};
use coord_storage::SledLogStorage;

use crate::journal::{Event, Journal};

/// Mutation that [`RecordingStorage`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ApplySnapshot,
    SetHardState,
    Append,
}

/// Temporary sled storage that journals successful mutations.
pub struct RecordingStorage {
    inner: SledLogStorage,
    journal: Journal,
    fail: Mutex<Option<FailPoint>>,
    write_delay: Mutex<Option<Duration>>,
}

impl RecordingStorage {
    pub fn new(journal: Journal) -> Result<Self> {
        Ok(Self::wrap(SledLogStorage::temporary()?, journal))
    }

    pub fn wrap(inner: SledLogStorage, journal: Journal) -> Self {
        Self {
            inner,
            journal,
            fail: Mutex::new(None),
            write_delay: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, point: FailPoint) {
        *self.fail.lock() = Some(point);
    }

    /// Every mutation blocks the calling thread for `delay` first, like a
    /// slow disk flush.
    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    pub fn inner(&self) -> &SledLogStorage {
        &self.inner
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if *self.fail.lock() == Some(point) {
            return Err(CoordError::persistence(format!("injected {:?} failure", point)));
        }
        Ok(())
    }
}

impl LogStorage for RecordingStorage {
    fn initial_state(&self) -> Result<(HardState, ConfState)> {
        self.inner.initial_state()
    }

    fn first_index(&self) -> Result<u64> {
        self.inner.first_index()
    }

    fn last_index(&self) -> Result<u64> {
        self.inner.last_index()
    }

    fn term(&self, index: u64) -> Result<u64> {
        self.inner.term(index)
    }

    fn entries(&self, lo: u64, hi: u64) -> Result<Vec<LogEntry>> {
        self.inner.entries(lo, hi)
    }

    fn snapshot(&self) -> Result<Snapshot> {
        self.inner.snapshot()
    }

    fn hard_state(&self) -> Result<HardState> {
        self.inner.hard_state()
    }

    fn set_hard_state(&self, hard_state: &HardState) -> Result<()> {
        self.check(FailPoint::SetHardState)?;
        self.inner.set_hard_state(hard_state)?;
        self.journal.record(Event::SetHardState(hard_state.clone()));
        Ok(())
    }

    fn append(&self, entries: &[LogEntry]) -> Result<()> {
        self.check(FailPoint::Append)?;
        self.inner.append(entries)?;
        self.journal
            .record(Event::Append(entries.iter().map(|e| e.index).collect()));
        Ok(())
    }

    fn compact(&self, cut_index: u64) -> Result<()> {
        self.inner.compact(cut_index)
    }

    fn create_snapshot(
        &self,
        index: u64,
        conf_state: Option<&ConfState>,
        data: Bytes,
    ) -> Result<Snapshot> {
        self.inner.create_snapshot(index, conf_state, data)
    }

    fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check(FailPoint::ApplySnapshot)?;
        self.inner.apply_snapshot(snapshot)?;
        self.journal.record(Event::ApplySnapshot(snapshot.index()));
        Ok(())
    }
}

/// In-memory key-value state machine that journals every apply, and can be
/// gated or made to fail.
pub struct RecordingStateMachine {
    inner: InMemoryStateMachine,
    journal: Journal,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

impl RecordingStateMachine {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemoryStateMachine::new(),
            journal,
            gate: None,
            fail: false,
        }
    }

    /// Every apply waits for one permit of `gate` first.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every apply fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn state(&self) -> &InMemoryStateMachine {
        &self.inner
    }
}

#[async_trait]
impl StateMachine for RecordingStateMachine {
    async fn apply(&mut self, entries: &[LogEntry], snapshot: Option<&Snapshot>) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| CoordError::state_machine("apply gate closed"))?
                .forget();
        }
        if self.fail {
            return Err(CoordError::state_machine("injected apply failure"));
        }

        self.inner.apply(entries, snapshot).await?;
        self.journal.record(Event::Apply {
            entries: entries.iter().map(|e| e.index).collect(),
            snapshot: snapshot.map(Snapshot::index),
        });
        Ok(())
    }
}

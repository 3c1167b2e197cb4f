use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{CoordError, LogEntry, Result, Snapshot};

/// External application state machine fed with committed entries.
#[async_trait]
pub trait StateMachine: Send + 'static {
    /// Applies one committed batch. When `snapshot` is present it is
    /// restored before `entries` are applied.
    async fn apply(&mut self, entries: &[LogEntry], snapshot: Option<&Snapshot>) -> Result<()>;
}

/// Key-value state machine interpreting payloads as text commands:
/// `SET <key> <value>` and `DEL <key>`.
///
/// Entries at or below the last applied index are skipped, so re-delivery
/// after a restart is harmless. Empty payloads (engine no-ops) are ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateMachine {
    pub state: BTreeMap<String, String>,
    pub applied_index: u64,
}

impl InMemoryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.state.get(key).map(String::as_str)
    }

    /// Serializes the current contents into a snapshot payload.
    pub fn snapshot_data(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.state = if snapshot.data.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_slice(&snapshot.data).map_err(|e| {
                CoordError::state_machine(format!(
                    "Failed to restore snapshot at index {}: {}",
                    snapshot.index(),
                    e
                ))
            })?
        };
        self.applied_index = snapshot.index();
        Ok(())
    }

    fn apply_command(&mut self, entry: &LogEntry) {
        let command = String::from_utf8_lossy(&entry.payload);
        let parts: Vec<&str> = command.split_whitespace().collect();

        match parts.as_slice() {
            [] => {}
            ["SET", key, value] => {
                self.state.insert(key.to_string(), value.to_string());
            }
            ["DEL", key] => {
                self.state.remove(*key);
            }
            _ => warn!("Ignoring invalid command at index {}: {}", entry.index, command),
        }
    }
}

#[async_trait]
impl StateMachine for InMemoryStateMachine {
    async fn apply(&mut self, entries: &[LogEntry], snapshot: Option<&Snapshot>) -> Result<()> {
        if let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) {
            if snapshot.index() > self.applied_index {
                self.restore(snapshot)?;
            }
        }

        for entry in entries {
            if entry.index <= self.applied_index {
                continue;
            }
            self.apply_command(entry);
            self.applied_index = entry.index;
        }

        debug!("State machine applied up to index {}", self.applied_index);
        Ok(())
    }
}

use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info};

use bpcon_common::{
    env::{
        consensus::types::Ballot,
        proposal::{Command, Operation},
    },
    error::Result,
};

/// Applied `(ballot, value)` pairs remembered for replay detection.
const APPLIED_HISTORY: usize = 1024;

/// Receives every value this node adopts or commits.
///
/// The same `(ballot, value)` can arrive more than once, e.g. when a node
/// both accepts a 1c and later hears its own commit, so implementations must
/// treat a repeat as a no-op.
pub trait StateApplier: Send + Sync {
    /// `raw_value` is the plain `<op>,<key>,<value>` command, already
    /// unwrapped from any transit encoding.
    fn apply(&self, raw_value: &[u8], ballot: Ballot) -> Result<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, String>,
    applied: BTreeMap<Ballot, Vec<u8>>,
}

/// In-memory key/value store driven by `P` / `D` commands.
#[derive(Debug, Default)]
pub struct KvStore {
    state: RwLock<StoreState>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl StateApplier for KvStore {
    fn apply(&self, raw_value: &[u8], ballot: Ballot) -> Result<()> {
        let command = Command::from_bytes(raw_value)?;
        let canonical = command.to_bytes();

        let mut state = self.write();
        if state.applied.get(&ballot) == Some(&canonical) {
            debug!("ballot #{} already applied, skipping replay of {}", ballot, command);
            return Ok(());
        }

        match command.op {
            Operation::Put => {
                state.entries.insert(command.key.clone(), command.value.clone());
            }
            Operation::Delete => {
                state.entries.remove(&command.key);
            }
        }
        info!("🗃️ updating state: ballot #{}, op: {}", ballot, command);

        state.applied.insert(ballot, canonical);
        while state.applied.len() > APPLIED_HISTORY {
            state.applied.pop_first();
        }
        Ok(())
    }
}

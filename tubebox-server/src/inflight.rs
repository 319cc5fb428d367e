//! Request de-duplication and supersession
//!
//! [`InflightGuard`] rejects a resolution that is identical to one already
//! running (`operation:argument` key). [`SlotRegistry`] lets a newer request
//! for a client-chosen slot cancel the older one, so debounced type-ahead
//! searches never deliver stale results.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Set of resolutions currently running
#[derive(Debug, Default, Clone)]
pub struct InflightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of one resolution; releases its key on drop
#[derive(Debug)]
pub struct InflightPermit {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InflightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `operation:argument`, failing with `AlreadyProcessing` if taken
    pub fn try_acquire(&self, operation: &str, argument: &str) -> Result<InflightPermit> {
        let key = format!("{}:{}", operation, argument);
        if !self.keys.lock().insert(key.clone()) {
            debug!("Rejecting duplicate request {}", key);
            return Err(Error::AlreadyProcessing(key));
        }
        Ok(InflightPermit {
            key,
            keys: Arc::clone(&self.keys),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    active: HashMap<String, (u64, CancellationToken)>,
}

/// Latest-request-wins registry keyed by slot name
#[derive(Debug, Default, Clone)]
pub struct SlotRegistry {
    table: Arc<Mutex<SlotTable>>,
    generation: Arc<AtomicU64>,
}

/// Ownership of a slot by one request
#[derive(Debug)]
pub struct SlotTicket {
    slot: String,
    generation: u64,
    token: CancellationToken,
    table: Arc<Mutex<SlotTable>>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over a slot, cancelling whichever request held it
    pub fn claim(&self, slot: &str) -> SlotTicket {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let previous = self
            .table
            .lock()
            .active
            .insert(slot.to_string(), (generation, token.clone()));
        if let Some((_, older)) = previous {
            debug!("Superseding earlier request in slot {}", slot);
            older.cancel();
        }

        SlotTicket {
            slot: slot.to_string(),
            generation,
            token,
            table: Arc::clone(&self.table),
        }
    }

    pub fn active_slots(&self) -> usize {
        self.table.lock().active.len()
    }
}

impl SlotTicket {
    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drive `work` unless a newer claim on the slot arrives first
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(Error::Superseded(self.slot.clone())),
            outcome = work => outcome,
        };

        // Finished in the same instant a newer request arrived
        if self.is_superseded() {
            return Err(Error::Superseded(self.slot.clone()));
        }
        outcome
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if matches!(table.active.get(&self.slot), Some((generation, _)) if *generation == self.generation)
        {
            table.active.remove(&self.slot);
        }
    }
}

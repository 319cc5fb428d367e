//! Listening history: pinned favorites plus most-recently-played
//!
//! A track is never in both lists. Pinned is capped at [`MAX_PINNED`] and
//! only grows through explicit pins; recent is capped at [`MAX_RECENT`] and
//! truncated from the oldest end. Truncated entries are handed back to the
//! caller so their cached audio can be evicted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tubebox_common::{TrackId, TrackRef};

use crate::error::{Error, Result};
use crate::sse::SseBroadcaster;
use crate::store::JsonStore;

pub const MAX_PINNED: usize = 5;
pub const MAX_RECENT: usize = 30;

/// Persisted history document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub pinned: Vec<TrackRef>,
    #[serde(default)]
    pub recent: Vec<TrackRef>,
}

impl HistoryRecord {
    pub fn is_pinned(&self, id: &TrackId) -> bool {
        self.pinned.iter().any(|t| &t.id == id)
    }

    pub fn find(&self, id: &TrackId) -> Option<&TrackRef> {
        self.pinned
            .iter()
            .chain(self.recent.iter())
            .find(|t| &t.id == id)
    }

    /// Move a played track to the front of recent (unless pinned)
    ///
    /// Returns the entries truncated off the end.
    pub fn record_play(&mut self, track: TrackRef) -> Vec<TrackRef> {
        if let Some(pinned) = self.pinned.iter_mut().find(|t| t.id == track.id) {
            if !track.title.is_empty() {
                pinned.title = track.title;
            }
            return Vec::new();
        }
        self.push_recent(track)
    }

    /// Pin a track at the front of pinned, taking it out of recent
    ///
    /// Pinning an already pinned track is a no-op. A track that is not in
    /// recent needs a title.
    pub fn pin(&mut self, id: &TrackId, title: Option<&str>) -> Result<()> {
        if self.is_pinned(id) {
            return Ok(());
        }
        if self.pinned.len() >= MAX_PINNED {
            return Err(Error::PinLimitReached(MAX_PINNED));
        }

        let from_recent = self
            .recent
            .iter()
            .position(|t| &t.id == id)
            .map(|index| self.recent.remove(index));

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| from_recent.as_ref().map(|t| t.title.clone()))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("title required to pin unknown track {}", id))
            })?;

        self.pinned.insert(0, TrackRef::new(id.clone(), title));
        Ok(())
    }

    /// Unpin a track, returning it to the front of recent
    ///
    /// Returns whether anything changed plus any entries truncated from recent.
    pub fn unpin(&mut self, id: &TrackId) -> (bool, Vec<TrackRef>) {
        match self.pinned.iter().position(|t| &t.id == id) {
            Some(index) => {
                let track = self.pinned.remove(index);
                (true, self.push_recent(track))
            }
            None => (false, Vec::new()),
        }
    }

    /// Restore invariants on a document read from disk
    pub fn normalize(&mut self) -> Vec<TrackRef> {
        let mut seen = std::collections::HashSet::new();
        self.pinned.retain(|t| seen.insert(t.id.clone()));
        self.pinned.truncate(MAX_PINNED);

        let pinned: std::collections::HashSet<_> = self.pinned.iter().map(|t| t.id.clone()).collect();
        let mut seen_recent = std::collections::HashSet::new();
        self.recent
            .retain(|t| !pinned.contains(&t.id) && seen_recent.insert(t.id.clone()));

        if self.recent.len() > MAX_RECENT {
            self.recent.split_off(MAX_RECENT)
        } else {
            Vec::new()
        }
    }

    fn push_recent(&mut self, track: TrackRef) -> Vec<TrackRef> {
        self.recent.retain(|t| t.id != track.id);
        self.recent.insert(0, track);
        if self.recent.len() > MAX_RECENT {
            self.recent.split_off(MAX_RECENT)
        } else {
            Vec::new()
        }
    }
}

/// History record guarded by a lock and mirrored to disk
///
/// Mutations are applied to a copy and committed only after the copy has
/// been persisted, so memory and disk never diverge on a failed write.
/// Committed records are pushed to observers while the lock is held, so
/// observers see them in commit order.
pub struct HistoryStore {
    record: Mutex<HistoryRecord>,
    store: JsonStore<HistoryRecord>,
    observer: Option<SseBroadcaster>,
}

impl HistoryStore {
    /// Load from disk; an unreadable document starts an empty history
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let store = JsonStore::new(path);
        let mut record: HistoryRecord = store.load_or_default().await;
        let dropped = record.normalize();
        if !dropped.is_empty() {
            info!("Dropped {} excess history entries on load", dropped.len());
        }
        debug!(
            "Loaded history: {} pinned, {} recent",
            record.pinned.len(),
            record.recent.len()
        );

        Self {
            record: Mutex::new(record),
            store,
            observer: None,
        }
    }

    /// Push every committed change to SSE observers
    pub fn with_observer(mut self, broadcaster: SseBroadcaster) -> Self {
        self.observer = Some(broadcaster);
        self
    }

    pub async fn snapshot(&self) -> HistoryRecord {
        self.record.lock().await.clone()
    }

    pub async fn find(&self, id: &TrackId) -> Option<TrackRef> {
        self.record.lock().await.find(id).cloned()
    }

    /// Record a play; returns the tracks that fell off recent
    pub async fn record_play(&self, track: TrackRef) -> Result<Vec<TrackRef>> {
        self.commit(|record| Ok(record.record_play(track)))
            .await
            .map(|(_, evicted)| evicted)
    }

    pub async fn pin(&self, id: &TrackId, title: Option<&str>) -> Result<HistoryRecord> {
        self.commit(|record| record.pin(id, title))
            .await
            .map(|(record, ())| record)
    }

    /// Returns the new record plus the tracks that fell off recent
    pub async fn unpin(&self, id: &TrackId) -> Result<(HistoryRecord, Vec<TrackRef>)> {
        self.commit(|record| Ok(record.unpin(id).1)).await
    }

    async fn commit<R, F>(&self, mutate: F) -> Result<(HistoryRecord, R)>
    where
        F: FnOnce(&mut HistoryRecord) -> Result<R>,
    {
        let mut guard = self.record.lock().await;
        let mut next = guard.clone();
        let outcome = mutate(&mut next)?;

        if next != *guard {
            self.store.save(&next).await?;
            *guard = next;
            if let Some(observer) = &self.observer {
                observer.publish_history(guard.clone());
            }
        }
        Ok((guard.clone(), outcome))
    }
}

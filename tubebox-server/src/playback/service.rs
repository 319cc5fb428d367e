//! Playback coordinator
//!
//! Owns the [`PlaybackState`] behind a single async lock and publishes a
//! snapshot (with a monotonically increasing revision) on every mutation.
//! Lock order is player then history; the history store never calls back
//! into the player.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tubebox_common::config::PlaybackSection;
use tubebox_common::{PlayerSnapshot, TrackId, TrackRef};

use super::sleep::SleepTimer;
use super::state::PlaybackState;
use crate::cache::AudioCache;
use crate::error::{Error, Result};
use crate::history::{HistoryRecord, HistoryStore};
use crate::inflight::InflightGuard;
use crate::resolver::ResolverChain;
use crate::sse::SseBroadcaster;
use crate::store::JsonStore;

/// Behavior knobs for the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// Fill an emptied queue with tracks related to the current one
    pub autofill: bool,
    pub autofill_count: usize,
    /// Start caching the queue head as soon as it changes
    pub prefetch_next: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from(&PlaybackSection::default())
    }
}

impl From<&PlaybackSection> for PlaybackSettings {
    fn from(section: &PlaybackSection) -> Self {
        Self {
            autofill: section.autofill,
            autofill_count: section.autofill_count,
            prefetch_next: section.prefetch_next,
        }
    }
}

struct Inner {
    playback: PlaybackState,
    revision: u64,
    published_sleep_armed: bool,
}

pub struct PlaybackService {
    inner: Mutex<Inner>,
    history: Arc<HistoryStore>,
    cache: Arc<AudioCache>,
    resolver: Arc<ResolverChain>,
    broadcaster: SseBroadcaster,
    guard: InflightGuard,
    queue_store: JsonStore<Vec<TrackRef>>,
    sleep: SleepTimer,
    settings: PlaybackSettings,
}

impl PlaybackService {
    /// Build the coordinator, restoring the persisted queue
    ///
    /// The player always starts idle; only the queue survives a restart.
    pub async fn restore(
        queue_store: JsonStore<Vec<TrackRef>>,
        history: Arc<HistoryStore>,
        cache: Arc<AudioCache>,
        resolver: Arc<ResolverChain>,
        broadcaster: SseBroadcaster,
        guard: InflightGuard,
        settings: PlaybackSettings,
    ) -> Arc<Self> {
        let queue = queue_store.load_or_default().await;
        if !queue.is_empty() {
            info!("Restored {} queued tracks", queue.len());
        }

        let service = Arc::new(Self {
            inner: Mutex::new(Inner {
                playback: PlaybackState::with_queue(queue),
                revision: 0,
                published_sleep_armed: false,
            }),
            history,
            cache,
            resolver,
            broadcaster,
            guard,
            queue_store,
            sleep: SleepTimer::new(),
            settings,
        });

        let snapshot = {
            let mut inner = service.inner.lock().await;
            service.publish(&mut inner, false).await
        };
        service.prefetch_head(&snapshot);
        service
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.broadcaster.latest_state()
    }

    pub async fn history(&self) -> HistoryRecord {
        self.history.snapshot().await
    }

    /// Tracks whose cached audio must survive: history, current and queued
    pub async fn retained_tracks(&self) -> HashSet<TrackId> {
        let inner = self.inner.lock().await;
        let record = self.history.snapshot().await;
        record
            .pinned
            .iter()
            .chain(record.recent.iter())
            .chain(inner.playback.current_track())
            .chain(inner.playback.queue().iter())
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn sleep_deadline(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.sleep.deadline()
    }

    pub async fn play(self: &Arc<Self>, id: TrackId, title: Option<String>) -> Result<PlayerSnapshot> {
        let track = self.describe(id, title).await?;
        info!(track = %track.id, "Play: {}", track.title);
        self.transition(move |playback| {
            playback.play(track.clone());
            Ok(Some(track))
        })
        .await
    }

    pub async fn pause(self: &Arc<Self>) -> Result<PlayerSnapshot> {
        self.transition(|playback| {
            playback.pause();
            Ok(None)
        })
        .await
    }

    pub async fn resume(self: &Arc<Self>) -> Result<PlayerSnapshot> {
        self.transition(|playback| playback.resume().map(|()| None))
            .await
    }

    /// Advance to the queue head; an empty queue stops playback
    pub async fn next(self: &Arc<Self>) -> Result<PlayerSnapshot> {
        self.transition(|playback| Ok(playback.advance().cloned()))
            .await
    }

    pub async fn enqueue(
        self: &Arc<Self>,
        id: TrackId,
        title: Option<String>,
        at_front: bool,
    ) -> Result<PlayerSnapshot> {
        let track = self.describe(id, title).await?;
        debug!(track = %track.id, at_front, "Enqueue");
        self.transition(move |playback| playback.enqueue(track, at_front).map(|()| None))
            .await
    }

    pub async fn clear_queue(self: &Arc<Self>) -> Result<PlayerSnapshot> {
        self.transition(|playback| {
            playback.clear_queue();
            Ok(None)
        })
        .await
    }

    /// Pin a track; looks up its title when neither given nor in history
    pub async fn pin(&self, id: TrackId, title: Option<String>) -> Result<HistoryRecord> {
        let title = match non_empty(title) {
            Some(title) => Some(title),
            None if self.history.find(&id).await.is_some() => None,
            None => Some(self.resolver.track_metadata(&id).await?.title),
        };
        self.history.pin(&id, title.as_deref()).await
    }

    pub async fn unpin(&self, id: TrackId) -> Result<HistoryRecord> {
        let (record, truncated) = self.history.unpin(&id).await?;
        let evictable = {
            let inner = self.inner.lock().await;
            unreferenced(&inner.playback, truncated)
        };
        self.evict(evictable).await;
        Ok(record)
    }

    /// Arm the sleep timer, replacing any armed one
    pub async fn schedule_sleep(self: &Arc<Self>, duration: Duration) -> Result<PlayerSnapshot> {
        if duration.is_zero() {
            return Err(Error::InvalidArgument(
                "sleep duration must be positive".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        let service: Weak<Self> = Arc::downgrade(self);
        let deadline = self.sleep.arm(duration, async move {
            if let Some(service) = service.upgrade() {
                service.sleep_expired().await;
            }
        })?;
        info!("Sleep timer armed until {}", deadline);
        Ok(self.publish(&mut inner, false).await)
    }

    pub async fn cancel_sleep(self: &Arc<Self>) -> Result<PlayerSnapshot> {
        if self.sleep.cancel() {
            info!("Sleep timer cancelled");
        }
        self.transition(|_| Ok(None)).await
    }

    async fn sleep_expired(self: Arc<Self>) {
        let outcome = self
            .transition(|playback| {
                playback.stop();
                Ok(None)
            })
            .await;
        if let Err(e) = outcome {
            warn!("Failed to stop playback on sleep timer: {}", e);
        }
    }

    /// Apply a transition under the player lock and publish the result
    ///
    /// `apply` returns the track that started playing, if any, which is then
    /// recorded in history. Nothing is published when the transition changed
    /// nothing observable.
    async fn transition<F>(self: &Arc<Self>, apply: F) -> Result<PlayerSnapshot>
    where
        F: FnOnce(&mut PlaybackState) -> Result<Option<TrackRef>>,
    {
        let (snapshot, evictable) = {
            let mut inner = self.inner.lock().await;
            let before = inner.playback.clone();

            let started = apply(&mut inner.playback)?;

            let mut truncated = Vec::new();
            if let Some(track) = started.as_ref() {
                match self.history.record_play(track.clone()).await {
                    Ok(dropped) => truncated = dropped,
                    Err(e) => warn!(track = %track.id, "Failed to record play: {}", e),
                }
            }

            let changed = inner.playback != before
                || started.is_some()
                || inner.published_sleep_armed != self.sleep.is_armed();
            if !changed {
                return Ok(self.broadcaster.latest_state());
            }

            let queue_changed = inner.playback.queue() != before.queue();
            let snapshot = self.publish(&mut inner, queue_changed).await;

            let mut evictable = unreferenced(&inner.playback, truncated);
            let dropped = dropped_tracks(&before, &inner.playback);
            if !dropped.is_empty() {
                let record = self.history.snapshot().await;
                evictable.extend(dropped.into_iter().filter(|id| record.find(id).is_none()));
            }
            (snapshot, evictable)
        };

        self.evict(evictable).await;
        self.follow_up(&snapshot);
        Ok(snapshot)
    }

    /// Bump the revision, persist the queue if asked, and fan out
    async fn publish(&self, inner: &mut Inner, persist_queue: bool) -> PlayerSnapshot {
        inner.revision += 1;
        inner.published_sleep_armed = self.sleep.is_armed();
        let snapshot = inner
            .playback
            .snapshot(inner.published_sleep_armed, inner.revision);

        if persist_queue {
            if let Err(e) = self.queue_store.save(&snapshot.queue).await {
                warn!("Failed to persist queue: {}", e);
            }
        }

        self.broadcaster.publish_state(snapshot.clone());
        snapshot
    }

    fn follow_up(self: &Arc<Self>, snapshot: &PlayerSnapshot) {
        self.prefetch_head(snapshot);

        if !self.settings.autofill || !snapshot.queue.is_empty() || !snapshot.is_playing {
            return;
        }
        if let Some(seed) = snapshot.current_track.clone() {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.autofill(seed).await });
        }
    }

    fn prefetch_head(&self, snapshot: &PlayerSnapshot) {
        if !self.settings.prefetch_next {
            return;
        }
        if let Some(head) = snapshot.queue.first() {
            let cache = Arc::clone(&self.cache);
            let id = head.id.clone();
            tokio::spawn(async move { cache.prefetch(&id).await });
        }
    }

    /// Queue tracks related to `seed` if the queue is still empty
    async fn autofill(self: Arc<Self>, seed: TrackRef) {
        let Ok(_permit) = self.guard.try_acquire("autofill", seed.id.as_str()) else {
            debug!(track = %seed.id, "Autofill already running");
            return;
        };

        let related = match self.resolver.related_tracks(&seed.id).await {
            Ok(related) => related,
            Err(e) => {
                warn!(track = %seed.id, "Autofill skipped: {}", e);
                return;
            }
        };

        let snapshot = {
            let mut inner = self.inner.lock().await;
            let still_wanted = inner.playback.queue().is_empty()
                && inner
                    .playback
                    .current_track()
                    .is_some_and(|t| t.id == seed.id);
            if !still_wanted {
                debug!(track = %seed.id, "Autofill no longer needed");
                return;
            }

            let mut added = 0;
            for track in related.into_iter().take(self.settings.autofill_count) {
                if inner.playback.enqueue(track, false).is_err() {
                    break;
                }
                added += 1;
            }
            if added == 0 {
                return;
            }
            info!(track = %seed.id, "Autofilled queue with {} related tracks", added);
            self.publish(&mut inner, true).await
        };

        self.prefetch_head(&snapshot);
    }

    /// Resolve a display title for a track
    async fn describe(&self, id: TrackId, title: Option<String>) -> Result<TrackRef> {
        if let Some(title) = non_empty(title) {
            return Ok(TrackRef::new(id, title));
        }
        if let Some(known) = self.history.find(&id).await {
            return Ok(known);
        }
        self.resolver.track_metadata(&id).await
    }

    async fn evict(&self, mut ids: Vec<TrackId>) {
        ids.sort();
        ids.dedup();
        for id in ids {
            self.cache.evict(&id).await;
        }
    }
}

/// Truncated history entries whose audio is no longer needed
fn unreferenced(playback: &PlaybackState, truncated: Vec<TrackRef>) -> Vec<TrackId> {
    truncated
        .into_iter()
        .map(|t| t.id)
        .filter(|id| !playback.references(id))
        .collect()
}

/// Tracks that were current or queued before a transition but no longer are
fn dropped_tracks(before: &PlaybackState, after: &PlaybackState) -> Vec<TrackId> {
    before
        .current_track()
        .into_iter()
        .chain(before.queue().iter())
        .map(|t| t.id.clone())
        .filter(|id| !after.references(id))
        .collect()
}

fn non_empty(title: Option<String>) -> Option<String> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

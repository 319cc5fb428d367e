//! SSE broadcaster for player and history updates
//!
//! Also holds the latest published player snapshot. `/state` reads it from
//! here, so polling and push always agree on what was last published.

use axum::response::sse::{Event, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use tubebox_common::PlayerSnapshot;

use super::events::SseEvent;
use crate::history::HistoryRecord;

/// SSE Broadcaster manages client connections and event distribution
#[derive(Clone)]
pub struct SseBroadcaster {
    tx: broadcast::Sender<SseEvent>,
    latest: watch::Sender<PlayerSnapshot>,
}

impl SseBroadcaster {
    /// Create a new SSE broadcaster
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events buffered per slow client before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(PlayerSnapshot::default());
        info!("SSE broadcaster initialized with capacity {}", capacity);
        Self { tx, latest }
    }

    /// Record and push a new player snapshot
    pub fn publish_state(&self, snapshot: PlayerSnapshot) {
        self.latest.send_replace(snapshot.clone());
        self.broadcast_lossy(SseEvent::state(snapshot));
    }

    pub fn publish_history(&self, record: HistoryRecord) {
        self.broadcast_lossy(SseEvent::history(record));
    }

    /// Last published player snapshot
    pub fn latest_state(&self) -> PlayerSnapshot {
        self.latest.borrow().clone()
    }

    /// Broadcast an event, ignoring if no clients are connected
    pub fn broadcast_lossy(&self, event: SseEvent) {
        if let Ok(count) = self.tx.send(event) {
            debug!("Broadcast event to {} clients", count);
        }
    }

    /// Get current number of connected clients
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Create an SSE stream for a new client connection
    ///
    /// The stream opens with the current snapshot. A client that falls behind
    /// the buffer is sent the current snapshot in place of the missed events.
    pub fn subscribe_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        // Subscribe before reading the snapshot so nothing published in
        // between is lost
        let rx = self.tx.subscribe();
        let latest = self.latest.subscribe();
        let initial = SseEvent::state(self.latest_state());

        let updates = BroadcastStream::new(rx).filter_map(move |result| {
            let latest = latest.clone();
            async move {
                let event = match result {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("SSE client lagged by {} events, resending state", skipped);
                        SseEvent::state(latest.borrow().clone())
                    }
                };
                event.to_axum_event().map(Ok)
            }
        });

        stream::iter(initial.to_axum_event().map(Ok)).chain(updates)
    }

    /// Create an Axum SSE response handler
    ///
    /// This is the handler function for GET /events
    pub fn handle_sse_connection(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        info!(
            "New SSE client connected, total clients: {}",
            self.client_count() + 1
        );
        tubebox_common::sse::with_keep_alive(self.subscribe_stream())
    }
}

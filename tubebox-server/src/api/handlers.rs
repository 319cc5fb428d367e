//! HTTP request handlers
//!
//! Resolution, playback control and history endpoints. Audio streaming
//! lives in [`super::audio`], the event stream in [`super::sse`].

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tubebox_common::{PlayerSnapshot, TrackId, TrackRef};

use crate::error::{Error, Result};
use crate::history::HistoryRecord;
use crate::resolver::{BreakerStatus, SearchHit};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    module: &'static str,
    version: &'static str,
    quota_breaker_tripped: bool,
    quota_breaker: BreakerStatus,
    observers: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    /// Client-chosen slot; a newer search on the same slot supersedes this one
    slot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    id: Option<String>,
}

impl IdParams {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    id: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    id: String,
    title: Option<String>,
    #[serde(default)]
    at_front: bool,
}

#[derive(Debug, Deserialize)]
pub struct UnpinRequest {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRequest {
    duration_ms: u64,
}

/// Acknowledgement carrying the snapshot the action produced
#[derive(Debug, Serialize)]
pub struct Ack {
    status: &'static str,
    state: PlayerSnapshot,
}

impl Ack {
    fn ok(state: PlayerSnapshot) -> Json<Self> {
        Json(Self { status: "ok", state })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepResponse {
    status: &'static str,
    state: PlayerSnapshot,
    fires_at: Option<chrono::DateTime<chrono::Utc>>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a required track id parameter
pub(crate) fn require_id(raw: Option<&str>) -> Result<TrackId> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidArgument("query parameter 'id' is required".to_string()))?;
    Ok(TrackId::parse(raw)?)
}

/// Unwrap a JSON body, turning axum's rejection into a structured 400
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidArgument(rejection.body_text()))
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let breaker = state.resolver.breaker().status();
    Json(HealthResponse {
        status: "ok",
        module: "tubebox",
        version: env!("CARGO_PKG_VERSION"),
        quota_breaker_tripped: breaker.tripped,
        quota_breaker: breaker,
        observers: state.broadcaster.client_count(),
    })
}

// ============================================================================
// Resolution Endpoints
// ============================================================================

/// GET /search?q=&slot=
pub async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| Error::InvalidArgument("query parameter 'q' is required".to_string()))?;

    debug!("Search: {}", query);

    // A slotted search supersedes its predecessor instead of colliding with it
    let hits = match params.slot.as_deref().filter(|s| !s.is_empty()) {
        Some(slot) => {
            let ticket = state.slots.claim(slot);
            ticket.run(state.resolver.search(query)).await?
        }
        None => {
            let _permit = state.inflight.try_acquire("search", query)?;
            state.resolver.search(query).await?
        }
    };
    Ok(Json(hits))
}

/// GET /related?id=
pub async fn related(
    State(state): State<SharedState>,
    Query(params): Query<IdParams>,
) -> Result<Json<Vec<TrackRef>>> {
    let id = require_id(params.id())?;
    let _permit = state.inflight.try_acquire("related", id.as_str())?;
    Ok(Json(state.resolver.related_tracks(&id).await?))
}

/// GET /video?id=
pub async fn video(
    State(state): State<SharedState>,
    Query(params): Query<IdParams>,
) -> Result<Json<TrackRef>> {
    let id = require_id(params.id())?;
    let _permit = state.inflight.try_acquire("metadata", id.as_str())?;
    Ok(Json(state.resolver.track_metadata(&id).await?))
}

// ============================================================================
// Playback Endpoints
// ============================================================================

/// GET /state - polling fallback for the event stream
pub async fn get_state(State(state): State<SharedState>) -> Json<PlayerSnapshot> {
    Json(state.player.snapshot())
}

/// POST /play {id, title}
pub async fn play(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<Ack>> {
    let request = body(payload)?;
    let id = TrackId::parse(&request.id)?;
    Ok(Ack::ok(state.player.play(id, request.title).await?))
}

/// POST /pause
pub async fn pause(State(state): State<SharedState>) -> Result<Json<Ack>> {
    Ok(Ack::ok(state.player.pause().await?))
}

/// POST /resume
pub async fn resume(State(state): State<SharedState>) -> Result<Json<Ack>> {
    Ok(Ack::ok(state.player.resume().await?))
}

/// POST /next
pub async fn next(State(state): State<SharedState>) -> Result<Json<Ack>> {
    Ok(Ack::ok(state.player.next().await?))
}

/// POST /enqueue {id, title, atFront}
pub async fn enqueue(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Json<Ack>> {
    let request = body(payload)?;
    let id = TrackId::parse(&request.id)?;
    Ok(Ack::ok(
        state
            .player
            .enqueue(id, request.title, request.at_front)
            .await?,
    ))
}

/// POST /queue/clear
pub async fn clear_queue(State(state): State<SharedState>) -> Result<Json<Ack>> {
    Ok(Ack::ok(state.player.clear_queue().await?))
}

/// POST /sleep {durationMs}
pub async fn schedule_sleep(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<SleepRequest>, JsonRejection>,
) -> Result<Json<SleepResponse>> {
    let request = body(payload)?;
    let duration = tubebox_common::time::millis_to_duration(request.duration_ms);
    let snapshot = state.player.schedule_sleep(duration).await?;
    Ok(Json(SleepResponse {
        status: "ok",
        state: snapshot,
        fires_at: state.player.sleep_deadline(),
    }))
}

/// DELETE /sleep
pub async fn cancel_sleep(State(state): State<SharedState>) -> Result<Json<Ack>> {
    Ok(Ack::ok(state.player.cancel_sleep().await?))
}

// ============================================================================
// History Endpoints
// ============================================================================

/// GET /history
pub async fn history(State(state): State<SharedState>) -> Json<HistoryRecord> {
    Json(state.player.history().await)
}

/// POST /pin {id, title?}
pub async fn pin(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<HistoryRecord>> {
    let request = body(payload)?;
    let id = TrackId::parse(&request.id)?;
    info!(track = %id, "Pin");
    Ok(Json(state.player.pin(id, request.title).await?))
}

/// POST /unpin {id}
pub async fn unpin(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<UnpinRequest>, JsonRejection>,
) -> Result<Json<HistoryRecord>> {
    let request = body(payload)?;
    let id = TrackId::parse(&request.id)?;
    info!(track = %id, "Unpin");
    Ok(Json(state.player.unpin(id).await?))
}

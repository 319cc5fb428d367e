//! GET /audio - stream a track's audio
//!
//! Cached tracks are served from disk with byte-range support. Uncached
//! tracks are streamed while the cache is populated; those responses carry
//! no length and advertise no range support until the entry is complete.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use tracing::debug;

use super::handlers::{require_id, IdParams};
use crate::cache::{ByteRange, CachedAudio};
use crate::error::{Error, Result};
use crate::state::SharedState;

const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

pub async fn stream_audio(
    State(state): State<SharedState>,
    Query(params): Query<IdParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let id = require_id(params.id())?;

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| {
            let parsed = ByteRange::parse(raw);
            if parsed.is_none() {
                debug!("Ignoring unparseable Range header: {}", raw);
            }
            parsed
        });

    if state.cache.has(&id).await {
        match state.cache.open(&id, range).await {
            Ok(cached) => return cached_response(cached),
            // Evicted between the check and the open: fetch it again
            Err(Error::NotCached(_)) => {}
            Err(e) => return Err(e),
        }
    }

    debug!(track = %id, "Audio not cached, streaming while populating");
    let stream = state.cache.populate(&id).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(e.to_string()))
}

fn cached_response(cached: CachedAudio) -> Result<Response> {
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, cached.content_length);

    builder = match cached.span {
        Some((start, end)) => builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, cached.total_size))
                .map_err(|e| Error::Internal(e.to_string()))?,
        ),
        None => builder.status(StatusCode::OK),
    };

    builder
        .body(Body::from_stream(cached.stream))
        .map_err(|e| Error::Internal(e.to_string()))
}

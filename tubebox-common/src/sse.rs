//! Server-Sent Events (SSE) utilities

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

/// Keep-alive interval for every tubebox event stream
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Serialize a payload into a named SSE event
///
/// Returns `None` (and logs) if the payload cannot be serialized, so a single
/// bad event never terminates a client stream.
pub fn json_event<T: Serialize>(name: &str, payload: &T) -> Option<Event> {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Failed to serialize SSE event {}: {}", name, e);
            None
        }
    }
}

/// Wrap an event stream into an SSE response with the standard keep-alive
pub fn with_keep_alive<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

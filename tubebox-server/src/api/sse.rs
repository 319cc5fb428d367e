//! GET /events - Server-Sent Events stream
//!
//! Opens with the current player snapshot, then delivers a `state` event on
//! every player change and a `history` event on every history change.

use axum::{extract::State, response::sse::{Event, Sse}};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::state::SharedState;

pub async fn event_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.broadcaster.handle_sse_connection()
}

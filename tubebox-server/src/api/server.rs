//! HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{audio, handlers, sse};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::state::SharedState;

/// Build the router with every endpoint
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Resolution
        .route("/search", get(handlers::search))
        .route("/related", get(handlers::related))
        .route("/video", get(handlers::video))
        .route("/audio", get(audio::stream_audio))
        // Playback control
        .route("/state", get(handlers::get_state))
        .route("/play", post(handlers::play))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/next", post(handlers::next))
        .route("/enqueue", post(handlers::enqueue))
        .route("/queue/clear", post(handlers::clear_queue))
        .route(
            "/sleep",
            post(handlers::schedule_sleep).delete(handlers::cancel_sleep),
        )
        // History
        .route("/history", get(handlers::history))
        .route("/pin", post(handlers::pin))
        .route("/unpin", post(handlers::unpin))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API until `shutdown` resolves
pub async fn run<F>(config: &ServiceConfig, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {}: {}", addr, e)))?;
    info!("tubebox listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

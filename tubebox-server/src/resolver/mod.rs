//! Resolver strategy chain
//!
//! Turns a query or track id into search results, related tracks, metadata or
//! an audio byte source. Strategies are tried in priority order:
//!
//! 1. Official data API (metered: guarded by the quota breaker, retried on
//!    transient failures)
//! 2. External extraction tool (unmetered, single attempt)
//!
//! The first strategy that succeeds wins. A quota signal trips the breaker and
//! moves on to the next strategy within the same call, so callers never see it.

pub mod breaker;
pub mod data_api;
pub mod extractor;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use tubebox_common::{TrackId, TrackRef};

use crate::error::{Error, Result};

pub use breaker::{BreakerStatus, QuotaBreaker};
pub use data_api::DataApiStrategy;
pub use extractor::ExtractorStrategy;

/// Owned stream of audio bytes
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// One search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: TrackId,
    pub title: String,
    pub thumbnail: String,
}

impl From<SearchHit> for TrackRef {
    fn from(hit: SearchHit) -> Self {
        TrackRef::new(hit.id, hit.title)
    }
}

/// Where a track's audio-only rendition can be read from
pub enum AudioSource {
    /// Bytes produced directly by the strategy
    Stream(ByteStream),
    /// Direct media URL to fetch over HTTP
    Url(String),
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSource::Stream(_) => f.write_str("AudioSource::Stream(..)"),
            AudioSource::Url(url) => write!(f, "AudioSource::Url({})", url),
        }
    }
}

impl AudioSource {
    /// Open the source as a byte stream
    pub fn into_stream(self, http: &reqwest::Client) -> ByteStream {
        match self {
            AudioSource::Stream(stream) => stream,
            AudioSource::Url(url) => {
                let http = http.clone();
                Box::pin(async_stream::try_stream! {
                    let response = http
                        .get(&url)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status())
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    let mut body = response.bytes_stream();
                    while let Some(chunk) = body.next().await {
                        yield chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    }
                })
            }
        }
    }
}

/// Failure reported by a single strategy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// Provider quota exhausted (only meaningful for metered strategies)
    #[error("quota exceeded")]
    QuotaExceeded,

    /// Network blip, timeout or malformed response: worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// Strategy cannot serve this request at all
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type StrategyResult<T> = std::result::Result<T, StrategyError>;

/// One way of resolving tracks
///
/// All four operations share the same normalized result types so the chain
/// can substitute one strategy for another transparently.
#[async_trait]
pub trait ResolverStrategy: Send + Sync {
    /// Strategy identifier for logging
    fn name(&self) -> &'static str;

    /// Whether calls draw on the quota guarded by the breaker
    fn is_metered(&self) -> bool {
        false
    }

    /// Whether the strategy is configured well enough to be tried
    fn is_available(&self) -> bool {
        true
    }

    /// Attempts per call before moving to the next strategy
    fn max_attempts(&self) -> u32 {
        1
    }

    async fn search(&self, query: &str, limit: usize) -> StrategyResult<Vec<SearchHit>>;

    async fn related_tracks(&self, id: &TrackId, limit: usize) -> StrategyResult<Vec<TrackRef>>;

    async fn track_metadata(&self, id: &TrackId) -> StrategyResult<TrackRef>;

    async fn audio_source(&self, id: &TrackId) -> StrategyResult<AudioSource>;
}

/// Ordered strategies sharing one quota breaker
pub struct ResolverChain {
    strategies: Vec<Arc<dyn ResolverStrategy>>,
    breaker: QuotaBreaker,
    search_limit: usize,
    related_limit: usize,
}

impl ResolverChain {
    pub fn new(strategies: Vec<Arc<dyn ResolverStrategy>>, breaker: QuotaBreaker) -> Self {
        Self {
            strategies,
            breaker,
            search_limit: 10,
            related_limit: 10,
        }
    }

    /// Bound the number of search and related results
    pub fn with_limits(mut self, search_limit: usize, related_limit: usize) -> Self {
        self.search_limit = search_limit.max(1);
        self.related_limit = related_limit.max(1);
        self
    }

    pub fn breaker(&self) -> &QuotaBreaker {
        &self.breaker
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidArgument("search query is empty".to_string()));
        }

        let limit = self.search_limit;
        let owned = query.to_string();
        let mut hits = self
            .run("search", move |strategy| {
                let query = owned.clone();
                async move { strategy.search(&query, limit).await }
            })
            .await?;
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn related_tracks(&self, id: &TrackId) -> Result<Vec<TrackRef>> {
        let limit = self.related_limit;
        let seed = id.clone();
        let mut tracks = self
            .run("related", move |strategy| {
                let seed = seed.clone();
                async move { strategy.related_tracks(&seed, limit).await }
            })
            .await?;
        tracks.retain(|t| &t.id != id);
        tracks.truncate(limit);
        Ok(tracks)
    }

    pub async fn track_metadata(&self, id: &TrackId) -> Result<TrackRef> {
        let id = id.clone();
        self.run("metadata", move |strategy| {
            let id = id.clone();
            async move { strategy.track_metadata(&id).await }
        })
        .await
    }

    pub async fn audio_source(&self, id: &TrackId) -> Result<AudioSource> {
        let id = id.clone();
        self.run("audio", move |strategy| {
            let id = id.clone();
            async move { strategy.audio_source(&id).await }
        })
        .await
    }

    /// Bounded-retry-then-fallback combinator shared by all operations
    async fn run<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn ResolverStrategy>) -> Fut,
        Fut: Future<Output = StrategyResult<T>>,
    {
        let mut last_error: Option<String> = None;

        for strategy in &self.strategies {
            if !strategy.is_available() {
                debug!(operation, strategy = strategy.name(), "Strategy unavailable, skipping");
                continue;
            }
            if strategy.is_metered() && self.breaker.is_tripped() {
                debug!(operation, strategy = strategy.name(), "Quota breaker tripped, skipping");
                continue;
            }

            let attempts = strategy.max_attempts().max(1);
            for attempt in 1..=attempts {
                match call(Arc::clone(strategy)).await {
                    Ok(value) => {
                        if attempt > 1 || last_error.is_some() {
                            info!(
                                operation,
                                strategy = strategy.name(),
                                attempt,
                                "Resolved after earlier failures"
                            );
                        }
                        return Ok(value);
                    }
                    Err(StrategyError::QuotaExceeded) => {
                        if strategy.is_metered() {
                            self.breaker.trip();
                        }
                        last_error = Some(format!("{}: quota exceeded", strategy.name()));
                        break;
                    }
                    Err(StrategyError::Transient(msg)) => {
                        warn!(
                            operation,
                            strategy = strategy.name(),
                            attempt,
                            attempts,
                            "Transient failure: {}",
                            msg
                        );
                        last_error = Some(format!("{}: {}", strategy.name(), msg));
                    }
                    Err(StrategyError::Unavailable(msg)) => {
                        debug!(operation, strategy = strategy.name(), "Unavailable: {}", msg);
                        last_error = Some(format!("{}: {}", strategy.name(), msg));
                        break;
                    }
                }
            }
        }

        Err(Error::ResolutionUnavailable {
            operation,
            last_error: last_error
                .unwrap_or_else(|| "no resolution strategy available".to_string()),
        })
    }
}

/// Decode the handful of HTML entities providers leave in titles
pub(crate) fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

//! Shared test fixtures: scripted resolver strategies and router helpers
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tubebox_common::{TrackId, TrackRef};
use tubebox_server::config::ServiceConfig;
use tubebox_server::resolver::{
    AudioSource, ResolverStrategy, SearchHit, StrategyError, StrategyResult,
};
use tubebox_server::SharedState;

/// How every operation of a [`FakeStrategy`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ok,
    Quota,
    Transient,
    Unavailable,
}

#[derive(Default)]
pub struct Calls {
    pub search: AtomicUsize,
    pub related: AtomicUsize,
    pub metadata: AtomicUsize,
    pub audio: AtomicUsize,
}

impl Calls {
    pub fn search(&self) -> usize {
        self.search.load(Ordering::SeqCst)
    }
    pub fn related(&self) -> usize {
        self.related.load(Ordering::SeqCst)
    }
    pub fn metadata(&self) -> usize {
        self.metadata.load(Ordering::SeqCst)
    }
    pub fn audio(&self) -> usize {
        self.audio.load(Ordering::SeqCst)
    }
}

struct Script {
    mode: Mode,
    catalog: Vec<(String, String)>,
    related: Vec<(String, String)>,
    audio: Vec<u8>,
    chunk_size: usize,
    chunk_delay: Duration,
    fail_audio_after_chunks: Option<usize>,
    search_delay: Duration,
}

/// In-memory strategy with call counters
pub struct FakeStrategy {
    name: &'static str,
    metered: bool,
    attempts: u32,
    pub calls: Calls,
    script: Mutex<Script>,
}

impl FakeStrategy {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            metered: false,
            attempts: 1,
            calls: Calls::default(),
            script: Mutex::new(Script {
                mode: Mode::Ok,
                catalog: vec![
                    ("lofi1".into(), "Lofi Beats One".into()),
                    ("lofi2".into(), "Lofi Beats Two".into()),
                    ("lofi3".into(), "Lofi Beats Three".into()),
                ],
                related: vec![
                    ("rel1".into(), "Related One".into()),
                    ("rel2".into(), "Related Two".into()),
                    ("rel3".into(), "Related Three".into()),
                ],
                audio: audio_bytes(10_000),
                chunk_size: 1_000,
                chunk_delay: Duration::ZERO,
                fail_audio_after_chunks: None,
                search_delay: Duration::ZERO,
            }),
        }
    }

    /// Behave like the quota-metered official API
    pub fn metered(mut self, attempts: u32) -> Self {
        self.metered = true;
        self.attempts = attempts;
        self
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn with_audio(self, audio: Vec<u8>, chunk_size: usize) -> Self {
        {
            let mut script = self.script.lock();
            script.audio = audio;
            script.chunk_size = chunk_size.max(1);
        }
        self
    }

    pub fn with_chunk_delay(self, delay: Duration) -> Self {
        self.script.lock().chunk_delay = delay;
        self
    }

    pub fn with_search_delay(self, delay: Duration) -> Self {
        self.script.lock().search_delay = delay;
        self
    }

    pub fn failing_audio_after(self, chunks: usize) -> Self {
        self.script.lock().fail_audio_after_chunks = Some(chunks);
        self
    }

    pub fn with_related(self, related: &[(&str, &str)]) -> Self {
        self.script.lock().related = related
            .iter()
            .map(|(id, title)| (id.to_string(), title.to_string()))
            .collect();
        self
    }

    pub fn set_mode(&self, mode: Mode) {
        self.script.lock().mode = mode;
    }

    pub fn set_audio_failure(&self, after_chunks: Option<usize>) {
        self.script.lock().fail_audio_after_chunks = after_chunks;
    }

    fn check(&self) -> StrategyResult<()> {
        match self.script.lock().mode {
            Mode::Ok => Ok(()),
            Mode::Quota => Err(StrategyError::QuotaExceeded),
            Mode::Transient => Err(StrategyError::Transient(format!("{} blip", self.name))),
            Mode::Unavailable => Err(StrategyError::Unavailable(format!("{} down", self.name))),
        }
    }
}

#[async_trait]
impl ResolverStrategy for FakeStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_metered(&self) -> bool {
        self.metered
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    async fn search(&self, _query: &str, limit: usize) -> StrategyResult<Vec<SearchHit>> {
        self.calls.search.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let delay = self.script.lock().search_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .script
            .lock()
            .catalog
            .iter()
            .take(limit)
            .map(|(id, title)| {
                let id = TrackId::parse(id).unwrap();
                SearchHit {
                    thumbnail: id.default_thumbnail(),
                    title: title.clone(),
                    id,
                }
            })
            .collect())
    }

    async fn related_tracks(&self, _id: &TrackId, limit: usize) -> StrategyResult<Vec<TrackRef>> {
        self.calls.related.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .script
            .lock()
            .related
            .iter()
            .take(limit)
            .map(|(id, title)| TrackRef::new(TrackId::parse(id).unwrap(), title.clone()))
            .collect())
    }

    async fn track_metadata(&self, id: &TrackId) -> StrategyResult<TrackRef> {
        self.calls.metadata.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let script = self.script.lock();
        let title = script
            .catalog
            .iter()
            .chain(script.related.iter())
            .find(|(known, _)| known == id.as_str())
            .map(|(_, title)| title.clone())
            .unwrap_or_else(|| format!("Track {}", id));
        Ok(TrackRef::new(id.clone(), title))
    }

    async fn audio_source(&self, _id: &TrackId) -> StrategyResult<AudioSource> {
        self.calls.audio.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let (chunks, delay, fail_after) = {
            let script = self.script.lock();
            let chunks: Vec<Bytes> = script
                .audio
                .chunks(script.chunk_size)
                .map(Bytes::copy_from_slice)
                .collect();
            (chunks, script.chunk_delay, script.fail_audio_after_chunks)
        };

        let stream = async_stream::try_stream! {
            for (index, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(index) {
                    Err::<(), _>(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "upstream reset",
                    ))?;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield chunk;
            }
        };
        Ok(AudioSource::Stream(Box::pin(stream)))
    }
}

/// Deterministic, non-repeating-looking audio payload
pub fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn track_id(raw: &str) -> TrackId {
    TrackId::parse(raw).unwrap()
}

pub fn track(raw: &str) -> TrackRef {
    TrackRef::new(track_id(raw), format!("Title {}", raw))
}

/// Config rooted in a temp dir with background autofill/prefetch disabled
pub fn quiet_config(root: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::for_root(root);
    config.playback.autofill = false;
    config.playback.prefetch_next = false;
    config
}

pub async fn build_state(
    config: &ServiceConfig,
    strategies: Vec<Arc<dyn ResolverStrategy>>,
) -> SharedState {
    SharedState::with_strategies(config, strategies)
        .await
        .expect("services should build")
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(body: Body) -> Bytes {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body")
}

pub async fn extract_json(body: Body) -> Value {
    serde_json::from_slice(&body_bytes(body).await).expect("Should parse JSON")
}

/// Wait (bounded) until `check` holds, yielding to background tasks
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

//! Audio cache
//!
//! Completed entries live at `<cache>/<id>.audio`. While a track is being
//! fetched its bytes go to `<id>.audio.part`; the part file is renamed into
//! place only after the upstream stream finished cleanly, so a completed
//! entry is never partial. A failed fetch deletes the part file.
//!
//! Population is single-flight per track: the first caller starts a
//! background fill task, and every caller (including the first) tails the
//! part file as it grows. Progress is published through a `watch` channel.

pub mod range;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use tubebox_common::TrackId;

use crate::error::{Error, Result};
use crate::resolver::{ByteStream, ResolverChain};

pub use range::ByteRange;

const ENTRY_EXTENSION: &str = "audio";
const PART_EXTENSION: &str = "audio.part";

/// Bytes read per chunk when tailing a part file
const TAIL_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FillState {
    Running,
    Complete,
    Failed(String),
}

#[derive(Debug, Clone)]
struct Progress {
    written: u64,
    state: FillState,
}

/// In-flight population of one track
struct Population {
    progress: watch::Receiver<Progress>,
}

/// Completed entry opened for reading
pub struct CachedAudio {
    pub stream: ByteStream,
    /// Size of the whole entry
    pub total_size: u64,
    /// Inclusive byte span served, when a range was requested
    pub span: Option<(u64, u64)>,
    /// Number of bytes the stream yields
    pub content_length: u64,
}

/// Content-addressed store of fetched audio
pub struct AudioCache {
    dir: PathBuf,
    resolver: Arc<ResolverChain>,
    http: reqwest::Client,
    inflight: Mutex<HashMap<TrackId, Arc<Population>>>,
}

impl AudioCache {
    pub fn new(dir: impl Into<PathBuf>, resolver: Arc<ResolverChain>) -> Self {
        Self {
            dir: dir.into(),
            resolver,
            http: reqwest::Client::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, id: &TrackId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, ENTRY_EXTENSION))
    }

    fn part_path(&self, id: &TrackId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, PART_EXTENSION))
    }

    /// Whether a completed entry exists
    pub async fn has(&self, id: &TrackId) -> bool {
        tokio::fs::metadata(self.entry_path(id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Whether a fill for this track is running
    pub fn is_populating(&self, id: &TrackId) -> bool {
        self.inflight.lock().contains_key(id)
    }

    /// Open a completed entry, optionally restricted to a byte range
    pub async fn open(&self, id: &TrackId, range: Option<ByteRange>) -> Result<CachedAudio> {
        let path = self.entry_path(id);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotCached(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let total_size = file.metadata().await?.len();
        let span = range.map(|r| r.resolve(total_size)).transpose()?;
        let (start, content_length) = match span {
            Some((start, end)) => (start, end - start + 1),
            None => (0, total_size),
        };

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        let stream = ReaderStream::new(file.take(content_length));

        Ok(CachedAudio {
            stream: Box::pin(stream),
            total_size,
            span,
            content_length,
        })
    }

    /// Stream a track while fetching it into the cache
    ///
    /// Joins a running fill for the same track instead of starting another.
    /// Resolves once the first bytes are available, so an upstream that fails
    /// before producing anything is reported as `StreamingFailed` rather than
    /// as a truncated body.
    pub async fn populate(self: &Arc<Self>, id: &TrackId) -> Result<ByteStream> {
        if self.has(id).await && !self.is_populating(id) {
            return Ok(self.open(id, None).await?.stream);
        }

        let population = self.ensure_population(id);
        let mut progress = population.progress.clone();

        loop {
            let current = progress.borrow_and_update().clone();
            match current.state {
                FillState::Failed(reason) => return Err(Error::StreamingFailed(reason)),
                FillState::Complete => break,
                FillState::Running if current.written > 0 => break,
                FillState::Running => {}
            }
            if progress.changed().await.is_err() {
                break;
            }
        }

        Ok(tail_stream(
            self.part_path(id),
            self.entry_path(id),
            population.progress.clone(),
        ))
    }

    /// Start filling a track in the background unless already cached
    pub async fn prefetch(self: &Arc<Self>, id: &TrackId) {
        if self.has(id).await {
            return;
        }
        debug!(track = %id, "Prefetching audio");
        self.ensure_population(id);
    }

    /// Remove a completed entry; best-effort
    pub async fn evict(&self, id: &TrackId) {
        match tokio::fs::remove_file(self.entry_path(id)).await {
            Ok(()) => info!(track = %id, "Evicted cached audio"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(track = %id, "Failed to evict cached audio: {}", e),
        }
    }

    /// Delete part files left behind by an interrupted run
    pub async fn sweep_partials(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(PART_EXTENSION) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale {}: {}", entry.path().display(), e),
                }
            }
        }
        if removed > 0 {
            info!("Removed {} stale partial cache files", removed);
        }
        Ok(removed)
    }

    /// Delete complete entries for tracks outside `keep`
    ///
    /// Part files and names that are not track ids are left alone.
    pub async fn retain_only(&self, keep: &HashSet<TrackId>) -> Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(PART_EXTENSION) {
                continue;
            }
            let Some(stem) = name
                .strip_suffix(ENTRY_EXTENSION)
                .and_then(|s| s.strip_suffix('.'))
            else {
                continue;
            };
            let Ok(id) = TrackId::parse(stem) else {
                continue;
            };
            if keep.contains(&id) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(track = %id, "Failed to remove orphaned audio: {}", e),
            }
        }
        if removed > 0 {
            info!("Removed {} orphaned cache entries", removed);
        }
        Ok(removed)
    }

    fn ensure_population(self: &Arc<Self>, id: &TrackId) -> Arc<Population> {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(id) {
            debug!(track = %id, "Joining in-flight population");
            return Arc::clone(existing);
        }

        let (tx, rx) = watch::channel(Progress {
            written: 0,
            state: FillState::Running,
        });
        let population = Arc::new(Population { progress: rx });
        inflight.insert(id.clone(), Arc::clone(&population));

        let cache = Arc::clone(self);
        let track = id.clone();
        tokio::spawn(async move { cache.fill(track, tx).await });

        population
    }

    async fn fill(self: Arc<Self>, id: TrackId, tx: watch::Sender<Progress>) {
        let part = self.part_path(&id);
        let entry = self.entry_path(&id);

        // Another fill may have committed the entry since the caller checked
        if let Ok(meta) = tokio::fs::metadata(&entry).await {
            if meta.is_file() && meta.len() > 0 {
                tx.send_modify(|p| {
                    p.written = meta.len();
                    p.state = FillState::Complete;
                });
                self.inflight.lock().remove(&id);
                return;
            }
        }

        let outcome = match self.download(&id, &part, &tx).await {
            Ok(bytes) => tokio::fs::rename(&part, &entry)
                .await
                .map(|()| bytes)
                .map_err(|e| format!("failed to commit cache entry: {}", e)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(bytes) => {
                info!(track = %id, bytes, "Cached audio");
                tx.send_modify(|p| p.state = FillState::Complete);
            }
            Err(reason) => {
                warn!(track = %id, "Audio population failed: {}", reason);
                if let Err(e) = tokio::fs::remove_file(&part).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to remove {}: {}", part.display(), e);
                    }
                }
                tx.send_modify(|p| p.state = FillState::Failed(reason));
            }
        }

        // Entry committed (or discarded) before the single-flight slot opens
        self.inflight.lock().remove(&id);
    }

    async fn download(
        &self,
        id: &TrackId,
        part: &Path,
        tx: &watch::Sender<Progress>,
    ) -> std::result::Result<u64, String> {
        use futures::StreamExt;

        let source = self
            .resolver
            .audio_source(id)
            .await
            .map_err(|e| e.to_string())?;
        let mut upstream = source.into_stream(&self.http);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| e.to_string())?;
        let mut file = File::create(part).await.map_err(|e| e.to_string())?;

        let mut written: u64 = 0;
        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(|e| format!("upstream error after {} bytes: {}", written, e))?;
            if chunk.is_empty() {
                continue;
            }
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            // Flush so tailing readers observe every byte reported below
            file.flush().await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
            tx.send_modify(|p| p.written = written);
        }

        if written == 0 {
            return Err("upstream produced no audio".to_string());
        }
        file.sync_all().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

/// Follow a growing part file until its population completes or fails
fn tail_stream(
    part: PathBuf,
    entry: PathBuf,
    mut progress: watch::Receiver<Progress>,
) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut file = open_part_or_entry(&part, &entry).await?;
        let mut position: u64 = 0;
        let mut buf = vec![0u8; TAIL_CHUNK];
        let mut sender_gone = false;

        loop {
            let current = progress.borrow_and_update().clone();
            if let FillState::Failed(reason) = &current.state {
                Err::<(), _>(io::Error::new(io::ErrorKind::Other, reason.clone()))?;
            }

            if position < current.written {
                let want = (current.written - position).min(TAIL_CHUNK as u64) as usize;
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    Err::<(), _>(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "cache file shorter than reported progress",
                    ))?;
                }
                position += n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
                continue;
            }

            if current.state == FillState::Complete {
                break;
            }
            if sender_gone {
                Err::<(), _>(io::Error::new(
                    io::ErrorKind::Other,
                    "population ended without completing",
                ))?;
            }
            if progress.changed().await.is_err() {
                sender_gone = true;
            }
        }
    })
}

/// The part file may already have been renamed into place
async fn open_part_or_entry(part: &Path, entry: &Path) -> io::Result<File> {
    match File::open(part).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => File::open(entry).await,
        Err(e) => Err(e),
    }
}

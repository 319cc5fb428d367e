//! External extraction tool strategy (yt-dlp)
//!
//! Unmetered fallback for every operation. Metadata calls parse the tool's
//! line-delimited JSON output; audio is piped from the tool's stdout.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use tubebox_common::{TrackId, TrackRef};

use super::{
    decode_entities, AudioSource, ResolverStrategy, SearchHit, StrategyError, StrategyResult,
};

/// Longest stderr excerpt carried into error messages
const STDERR_EXCERPT: usize = 400;

/// Runs the extraction tool as a child process
#[derive(Debug, Clone)]
pub struct ExtractorStrategy {
    binary: String,
    timeout: Duration,
    stall_timeout: Duration,
}

impl ExtractorStrategy {
    pub fn new(binary: impl Into<String>, timeout: Duration, stall_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            stall_timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run the tool to completion and parse one JSON document per line
    async fn run_json_lines(&self, args: Vec<String>) -> StrategyResult<Vec<Value>> {
        debug!("Running {} {:?}", self.binary, args);

        let child = self.command(&args).spawn().map_err(|e| {
            StrategyError::Unavailable(format!("cannot start {}: {}", self.binary, e))
        })?;

        // Dropping the future on timeout drops the child, which kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                StrategyError::Transient(format!(
                    "{} timed out after {:?}",
                    self.binary, self.timeout
                ))
            })?
            .map_err(|e| StrategyError::Transient(format!("{} failed: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(StrategyError::Transient(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                excerpt(&String::from_utf8_lossy(&output.stderr))
            )));
        }

        parse_json_lines(&output.stdout)
    }
}

#[async_trait]
impl ResolverStrategy for ExtractorStrategy {
    fn name(&self) -> &'static str {
        "extractor"
    }

    async fn search(&self, query: &str, limit: usize) -> StrategyResult<Vec<SearchHit>> {
        let entries = self
            .run_json_lines(vec![
                "--flat-playlist".into(),
                "--dump-json".into(),
                "--no-warnings".into(),
                format!("ytsearch{}:{}", limit, query),
            ])
            .await?;
        Ok(entries.iter().filter_map(entry_to_hit).collect())
    }

    async fn related_tracks(&self, id: &TrackId, limit: usize) -> StrategyResult<Vec<TrackRef>> {
        // The platform's auto-generated mix for a video lists related tracks,
        // starting with the seed itself
        let entries = self
            .run_json_lines(vec![
                "--flat-playlist".into(),
                "--dump-json".into(),
                "--no-warnings".into(),
                "--playlist-end".into(),
                (limit + 1).to_string(),
                format!("{}&list=RD{}", id.watch_url(), id),
            ])
            .await?;
        Ok(entries
            .iter()
            .filter_map(entry_to_hit)
            .filter(|hit| &hit.id != id)
            .map(TrackRef::from)
            .collect())
    }

    async fn track_metadata(&self, id: &TrackId) -> StrategyResult<TrackRef> {
        let entries = self
            .run_json_lines(vec![
                "--dump-json".into(),
                "--skip-download".into(),
                "--no-playlist".into(),
                "--no-warnings".into(),
                id.watch_url(),
            ])
            .await?;
        let title = entries
            .first()
            .and_then(|entry| entry["title"].as_str())
            .ok_or_else(|| StrategyError::Transient("metadata has no title".to_string()))?;
        Ok(TrackRef::new(id.clone(), decode_entities(title)))
    }

    async fn audio_source(&self, id: &TrackId) -> StrategyResult<AudioSource> {
        let args: Vec<String> = vec![
            "-f".into(),
            "bestaudio".into(),
            "-o".into(),
            "-".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
            id.watch_url(),
        ];
        debug!("Streaming audio via {} {:?}", self.binary, args);

        let mut child = self.command(&args).spawn().map_err(|e| {
            StrategyError::Unavailable(format!("cannot start {}: {}", self.binary, e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StrategyError::Transient("extractor stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let binary = self.binary.clone();
        let stall = self.stall_timeout;
        let track = id.clone();

        let stream = async_stream::try_stream! {
            // Drain stderr concurrently so a chatty tool never blocks on a full pipe
            let stderr_task = stderr.map(|mut pipe| {
                tokio::spawn(async move {
                    let mut text = String::new();
                    let _ = pipe.read_to_string(&mut text).await;
                    text
                })
            });

            let mut reader = ReaderStream::new(stdout);
            let mut total: u64 = 0;
            loop {
                let next = tokio::time::timeout(stall, reader.next())
                    .await
                    .map_err(|_| io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} produced no audio for {:?}", binary, stall),
                    ))?;
                match next {
                    Some(chunk) => {
                        let chunk = chunk?;
                        total += chunk.len() as u64;
                        yield chunk;
                    }
                    None => break,
                }
            }

            let status = child.wait().await?;
            if !status.success() || total == 0 {
                let stderr_text = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                warn!(track = %track, "Audio extraction failed ({}): {}", status, excerpt(&stderr_text));
                Err::<(), _>(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} exited with {} after {} bytes", binary, status, total),
                ))?;
            }
        };

        Ok(AudioSource::Stream(Box::pin(stream)))
    }
}

/// Parse line-delimited JSON, skipping lines that are not JSON objects
pub(crate) fn parse_json_lines(stdout: &[u8]) -> StrategyResult<Vec<Value>> {
    let text = String::from_utf8_lossy(stdout);
    let mut entries = Vec::new();
    let mut rejected = 0usize;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => entries.push(value),
            _ => rejected += 1,
        }
    }

    if entries.is_empty() && rejected > 0 {
        return Err(StrategyError::Transient(format!(
            "extractor output malformed ({} unparseable lines)",
            rejected
        )));
    }
    if rejected > 0 {
        debug!("Skipped {} unparseable extractor lines", rejected);
    }
    Ok(entries)
}

/// Normalize one tool entry into a search result
pub(crate) fn entry_to_hit(entry: &Value) -> Option<SearchHit> {
    let id = TrackId::parse(entry["id"].as_str()?).ok()?;
    let title = decode_entities(entry["title"].as_str().unwrap_or_default());
    let thumbnail = entry["thumbnails"]
        .as_array()
        .and_then(|thumbs| thumbs.first())
        .and_then(|t| t["url"].as_str())
        .or_else(|| entry["thumbnail"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| id.default_thumbnail());
    Some(SearchHit {
        id,
        title,
        thumbnail,
    })
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.len() <= STDERR_EXCERPT {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

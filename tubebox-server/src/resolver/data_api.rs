//! Official video data API strategy
//!
//! Metered: every call consumes provider quota. A 403 carrying a quota reason
//! is reported as [`StrategyError::QuotaExceeded`] so the chain trips its
//! breaker. This strategy never serves audio.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use tubebox_common::{TrackId, TrackRef};

use super::{
    decode_entities, AudioSource, ResolverStrategy, SearchHit, StrategyError, StrategyResult,
};

/// Default endpoint of the official API
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Error reasons the provider uses for an exhausted quota
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded", "dailyLimitExceededUnreg"];

/// Client for the official data API
pub struct DataApiStrategy {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    attempts: u32,
}

impl DataApiStrategy {
    /// Build the strategy; without an API key it reports itself unavailable
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        attempts: u32,
        timeout: Duration,
    ) -> StrategyResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tubebox/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| StrategyError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            attempts: attempts.max(1),
        })
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> StrategyResult<Value> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StrategyError::Unavailable("no API key configured".to_string()))?;

        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("Data API request: {} {:?}", url, params);

        let response = self
            .http
            .get(&url)
            .query(params)
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| StrategyError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| StrategyError::Transient(format!("malformed response ({}): {}", status, e)))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_error(status, &body))
        }
    }
}

#[async_trait]
impl ResolverStrategy for DataApiStrategy {
    fn name(&self) -> &'static str {
        "data-api"
    }

    fn is_metered(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    async fn search(&self, query: &str, limit: usize) -> StrategyResult<Vec<SearchHit>> {
        let body = self
            .get_json(
                "search",
                &[
                    ("part", "snippet".to_string()),
                    ("type", "video".to_string()),
                    ("maxResults", limit.to_string()),
                    ("q", query.to_string()),
                ],
            )
            .await?;
        parse_search_items(&body)
    }

    async fn related_tracks(&self, id: &TrackId, limit: usize) -> StrategyResult<Vec<TrackRef>> {
        let body = self
            .get_json(
                "search",
                &[
                    ("part", "snippet".to_string()),
                    ("type", "video".to_string()),
                    ("maxResults", limit.to_string()),
                    ("relatedToVideoId", id.to_string()),
                ],
            )
            .await?;
        Ok(parse_search_items(&body)?
            .into_iter()
            .filter(|hit| &hit.id != id)
            .map(TrackRef::from)
            .collect())
    }

    async fn track_metadata(&self, id: &TrackId) -> StrategyResult<TrackRef> {
        let body = self
            .get_json(
                "videos",
                &[("part", "snippet".to_string()), ("id", id.to_string())],
            )
            .await?;
        parse_video_item(&body, id)
    }

    async fn audio_source(&self, _id: &TrackId) -> StrategyResult<AudioSource> {
        Err(StrategyError::Unavailable(
            "data API does not serve audio".to_string(),
        ))
    }
}

/// Map a non-success response onto the strategy error taxonomy
pub(crate) fn classify_error(status: StatusCode, body: &Value) -> StrategyError {
    let reasons: Vec<&str> = body["error"]["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|e| e["reason"].as_str()).collect())
        .unwrap_or_default();
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("no error message")
        .to_string();

    if status == StatusCode::FORBIDDEN && reasons.iter().any(|r| QUOTA_REASONS.contains(r)) {
        return StrategyError::QuotaExceeded;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return StrategyError::Transient(format!("{}: {}", status, message));
    }
    StrategyError::Unavailable(format!("{}: {}", status, message))
}

/// Extract video results from a `search` response, skipping channels/playlists
pub(crate) fn parse_search_items(body: &Value) -> StrategyResult<Vec<SearchHit>> {
    let items = body["items"]
        .as_array()
        .ok_or_else(|| StrategyError::Transient("response has no items array".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let id = TrackId::parse(item["id"]["videoId"].as_str()?).ok()?;
            let snippet = &item["snippet"];
            let title = decode_entities(snippet["title"].as_str().unwrap_or_default());
            let thumbnail = ["default", "medium", "high"]
                .iter()
                .find_map(|size| snippet["thumbnails"][*size]["url"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| id.default_thumbnail());
            Some(SearchHit {
                id,
                title,
                thumbnail,
            })
        })
        .collect())
}

/// Extract the single track from a `videos` response
pub(crate) fn parse_video_item(body: &Value, id: &TrackId) -> StrategyResult<TrackRef> {
    let item = body["items"]
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| StrategyError::Unavailable(format!("video {} not found", id)))?;
    let title = item["snippet"]["title"]
        .as_str()
        .ok_or_else(|| StrategyError::Transient("video has no title".to_string()))?;
    Ok(TrackRef::new(id.clone(), decode_entities(title)))
}

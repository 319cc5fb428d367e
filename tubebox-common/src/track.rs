//! Track identifiers and the shared snapshot shape
//!
//! `TrackId` is the video platform's opaque identifier. It doubles as the
//! cache file name, so only URL/file-name safe characters are accepted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Longest identifier accepted from clients
pub const MAX_TRACK_ID_LEN: usize = 64;

/// Opaque external video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackId(String);

impl TrackId {
    /// Parse and validate an identifier
    ///
    /// Accepts 1-64 characters from `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("track id is empty".to_string()));
        }
        if raw.len() > MAX_TRACK_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "track id longer than {} characters",
                MAX_TRACK_ID_LEN
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidInput(format!("invalid track id: {}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL on the video platform
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }

    /// Platform default thumbnail, used when a provider omits one
    pub fn default_thumbnail(&self) -> String {
        format!("https://i.ytimg.com/vi/{}/default.jpg", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TrackId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TrackId> for String {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Track reference: identifier plus display title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: TrackId,
    pub title: String,
}

impl TrackRef {
    pub fn new(id: TrackId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// Player snapshot pushed to observers and served to pollers
///
/// `revision` increases by one with every published mutation, so a poller can
/// tell whether it has already seen a state delivered over the push channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub current_track: Option<TrackRef>,
    pub is_playing: bool,
    pub queue: Vec<TrackRef>,
    pub sleep_armed: bool,
    pub revision: u64,
}

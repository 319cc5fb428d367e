//! SSE event types pushed to observers

use axum::response::sse::Event;
use serde::Serialize;
use tubebox_common::PlayerSnapshot;
use uuid::Uuid;

use crate::history::HistoryRecord;

/// Event name carrying a [`PlayerSnapshot`]
pub const STATE_EVENT: &str = "state";

/// Event name carrying a [`HistoryRecord`]
pub const HISTORY_EVENT: &str = "history";

/// SSE event wrapper for transmission
#[derive(Debug, Clone, Serialize)]
pub struct SseEvent {
    /// Event type name
    pub event: &'static str,

    /// Event data (JSON)
    pub data: SseEventData,

    /// Event ID; the snapshot revision for state events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// SSE event payloads, serialized without a wrapper so clients receive the
/// same shape `/state` and `/history` return
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SseEventData {
    PlayerState(PlayerSnapshot),
    HistoryChanged(HistoryRecord),
}

impl SseEvent {
    pub fn state(snapshot: PlayerSnapshot) -> Self {
        Self {
            event: STATE_EVENT,
            id: Some(snapshot.revision.to_string()),
            data: SseEventData::PlayerState(snapshot),
        }
    }

    pub fn history(record: HistoryRecord) -> Self {
        Self {
            event: HISTORY_EVENT,
            id: Some(Uuid::new_v4().to_string()),
            data: SseEventData::HistoryChanged(record),
        }
    }

    /// Convert into an axum SSE event; `None` if the payload fails to serialize
    pub fn to_axum_event(&self) -> Option<Event> {
        let event = tubebox_common::sse::json_event(self.event, &self.data)?;
        Some(match &self.id {
            Some(id) => event.id(id.as_str()),
            None => event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_event_serializes_snapshot_shape() {
        let snapshot = PlayerSnapshot {
            is_playing: true,
            revision: 7,
            ..Default::default()
        };
        let event = SseEvent::state(snapshot);

        assert_eq!(event.id.as_deref(), Some("7"));
        let json = serde_json::to_value(&event.data).unwrap();
        assert_eq!(json["isPlaying"], true);
        assert_eq!(json["revision"], 7);
        assert!(json.get("type").is_none());
    }

    #[test]
    fn test_history_event_serializes_lists() {
        let event = SseEvent::history(HistoryRecord::default());
        let json = serde_json::to_value(&event.data).unwrap();
        assert!(json["pinned"].as_array().unwrap().is_empty());
        assert!(json["recent"].as_array().unwrap().is_empty());
        assert!(event.to_axum_event().is_some());
    }
}

//! Error types for tubebox-server
//!
//! Every variant maps to a structured HTTP error body
//! `{"error": <message>, "reason": <code>}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Main error type for tubebox-server
#[derive(Error, Debug)]
pub enum Error {
    /// Every resolution strategy failed
    #[error("{operation} unavailable: {last_error}")]
    ResolutionUnavailable {
        operation: &'static str,
        last_error: String,
    },

    /// Official API quota exhausted (internal signal, triggers fallback)
    #[error("API quota exceeded")]
    QuotaExceeded,

    /// Track has no completed cache entry
    #[error("Track not cached: {0}")]
    NotCached(String),

    /// Upstream audio stream failed while populating the cache
    #[error("Audio streaming failed: {0}")]
    StreamingFailed(String),

    /// Queue already holds the maximum number of tracks
    #[error("Queue is full (max {0} tracks)")]
    QueueFull(usize),

    /// Pinned list already holds the maximum number of tracks
    #[error("Pin limit reached (max {0} pinned tracks)")]
    PinLimitReached(usize),

    /// Missing or malformed request parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identical resolution already running
    #[error("Already processing {0}")]
    AlreadyProcessing(String),

    /// Cancelled by a newer request for the same slot
    #[error("Request superseded by a newer one for slot {0}")]
    Superseded(String),

    /// Requested byte range lies outside the cached file
    #[error("Requested range not satisfiable (size {size})")]
    RangeNotSatisfiable { size: u64 },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted document could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using tubebox-server Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<tubebox_common::Error> for Error {
    fn from(err: tubebox_common::Error) -> Self {
        match err {
            tubebox_common::Error::InvalidInput(msg) => Error::InvalidArgument(msg),
            tubebox_common::Error::Config(msg) => Error::Config(msg),
            tubebox_common::Error::Io(e) => Error::Io(e),
        }
    }
}

impl Error {
    /// Machine-readable reason code
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ResolutionUnavailable { .. } => "resolution_unavailable",
            Error::QuotaExceeded => "quota_exceeded",
            Error::NotCached(_) => "not_cached",
            Error::StreamingFailed(_) => "streaming_failed",
            Error::QueueFull(_) => "queue_full",
            Error::PinLimitReached(_) => "pin_limit_reached",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::AlreadyProcessing(_) => "already_processing",
            Error::Superseded(_) => "superseded",
            Error::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotCached(_) => StatusCode::NOT_FOUND,
            Error::QueueFull(_)
            | Error::PinLimitReached(_)
            | Error::AlreadyProcessing(_)
            | Error::Superseded(_) => StatusCode::CONFLICT,
            Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::StreamingFailed(_) => StatusCode::BAD_GATEWAY,
            Error::ResolutionUnavailable { .. } | Error::QuotaExceeded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "reason": self.reason(),
        }));

        let mut response = (status, body).into_response();
        if let Error::RangeNotSatisfiable { size } = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_errors_are_client_errors() {
        assert_eq!(Error::QueueFull(10).status_code(), StatusCode::CONFLICT);
        assert_eq!(Error::PinLimitReached(5).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::InvalidArgument("q".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_resolution_failure_is_server_error() {
        let err = Error::ResolutionUnavailable {
            operation: "search",
            last_error: "boom".into(),
        };
        assert!(err.status_code().is_server_error());
        assert_eq!(err.reason(), "resolution_unavailable");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_range_error_sets_content_range() {
        let response = Error::RangeNotSatisfiable { size: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */42");
    }

    #[test]
    fn test_common_invalid_input_maps_to_invalid_argument() {
        let err: Error = tubebox_common::Error::InvalidInput("bad id".into()).into();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}

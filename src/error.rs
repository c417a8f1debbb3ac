#![forbid(unsafe_code)]

//! Error taxonomy shared by the extractor and the HTTP handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong while driving the extraction tool.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url: {0}")]
    Unsupported(String),

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extractor failed: {0}")]
    Failed(String),

    #[error("extractor returned unreadable metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Sorts a failed tool run into the taxonomy using the fatal line of its
    /// stderr. Earlier warnings (retried requests and the like) are ignored.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = last_error_line(stderr);
        let lower = message.to_ascii_lowercase();

        if lower.contains("unsupported url")
            || lower.contains("no video formats found")
            || lower.contains("requested format is not available")
            || lower.contains("video unavailable")
            || lower.contains("this video is private")
        {
            return Self::Unsupported(message);
        }

        if lower.contains("is not a valid url")
            || lower.contains("invalid url")
            || lower.contains("unable to extract video id")
        {
            return Self::InvalidUrl(message);
        }

        if lower.contains("unable to download webpage")
            || lower.contains("unable to download json metadata")
            || lower.contains("failed to resolve")
            || lower.contains("name or service not known")
            || lower.contains("getaddrinfo")
            || lower.contains("connection refused")
            || lower.contains("connection reset")
            || lower.contains("network is unreachable")
            || lower.contains("timed out")
            || lower.contains("http error")
        {
            return Self::Unreachable(message);
        }

        Self::Failed(message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::BadInput,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Unreachable(_) | Self::Timeout(_) => ErrorKind::Unreachable,
            Self::Spawn { .. } | Self::Failed(_) | Self::Parse(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// yt-dlp prefixes the fatal message with `ERROR:`; fall back to the last
/// non-empty line when it does not.
fn last_error_line(stderr: &str) -> String {
    let lines = stderr.lines().map(str::trim).filter(|line| !line.is_empty());
    let chosen = lines
        .clone()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .unwrap_or("no diagnostic output");
    chosen
        .strip_prefix("ERROR:")
        .unwrap_or(chosen)
        .trim()
        .to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    Unreachable,
    Unsupported,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadInput => StatusCode::BAD_REQUEST,
            Self::Unsupported => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unreachable => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: kind.status(),
            kind,
            message: message.into(),
        }
    }

    /// Creates a 400 error with the provided message.
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "extraction failed");
        } else {
            tracing::warn!(error = %err, kind = ?kind, "extraction rejected");
        }
        Self::new(kind, err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    kind: ErrorKind,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[test]
    fn classifies_unsupported_site() {
        let err = ExtractError::from_stderr(
            "WARNING: something\nERROR: Unsupported URL: https://example.com/page\n",
        );
        assert!(matches!(err, ExtractError::Unsupported(_)));
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.to_string(), "unsupported url: Unsupported URL: https://example.com/page");
    }

    #[test]
    fn classifies_invalid_url() {
        let err = ExtractError::from_stderr("ERROR: 'not a url' is not a valid URL.");
        assert_eq!(err.kind(), ErrorKind::BadInput);
    }

    #[test]
    fn classifies_network_failures() {
        for stderr in [
            "ERROR: [generic] Unable to download webpage: <urlopen error [Errno -2] Name or service not known>",
            "ERROR: [youtube] abc: Unable to download JSON metadata: HTTP Error 503",
            "ERROR: Connection refused",
        ] {
            assert_eq!(ExtractError::from_stderr(stderr).kind(), ErrorKind::Unreachable);
        }
    }

    #[test]
    fn unknown_failures_are_internal() {
        let err = ExtractError::from_stderr("ERROR: Postprocessing: ffmpeg not found\n");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "extractor failed: Postprocessing: ffmpeg not found");
    }

    #[test]
    fn earlier_warnings_do_not_decide_the_kind() {
        let err = ExtractError::from_stderr(
            "WARNING: [youtube] abc: Unable to download webpage: HTTP Error 429: Too Many Requests. Retrying (1/3)...\n\
             ERROR: Postprocessing: Conversion failed!\n",
        );
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "extractor failed: Postprocessing: Conversion failed!");
    }

    #[test]
    fn empty_stderr_still_has_a_message() {
        let err = ExtractError::from_stderr("");
        assert_eq!(err.to_string(), "extractor failed: no diagnostic output");
    }

    #[test]
    fn timeouts_count_as_unreachable() {
        assert_eq!(ExtractError::Timeout(30).kind(), ErrorKind::Unreachable);
        assert_eq!(ErrorKind::Unreachable.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::bad_input("missing url").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "missing url");
        assert_eq!(parsed["kind"], "bad_input");
    }

    #[tokio::test]
    async fn not_found_has_its_own_kind() {
        let response = ApiError::not_found("endpoint not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["kind"], "not_found");
    }

    #[test]
    fn extract_error_maps_to_status() {
        let api: ApiError = ExtractError::Unsupported("nope".into()).into();
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api.kind, ErrorKind::Unsupported);
    }
}

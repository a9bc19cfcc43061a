use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by every stage, the engine and the service.
///
/// Exactly one variant is active. The serialized form is internally tagged on
/// `type` with camelCase field names, which is also the shape handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CrawlError {
    #[error("fetch of {url} failed with status {status} {status_text}")]
    FetchFailed {
        status: u16,
        status_text: String,
        url: String,
    },
    #[error("timed out after {timeout_ms}ms during stage {stage}")]
    Timeout { timeout_ms: u64, stage: String },
    #[error("stage {stage} failed to parse: {message}")]
    ParseFailed { message: String, stage: String },
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    #[error("invalid html: {message}")]
    InvalidHtml { message: String },
    #[error("unexpected failure: {message}")]
    Unknown {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

impl CrawlError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
            cause: None,
        }
    }

    pub fn invalid_html(message: impl Into<String>) -> Self {
        Self::InvalidHtml {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            cause: None,
        }
    }

    pub fn timeout(timeout_ms: u64, stage: impl Into<String>) -> Self {
        Self::Timeout {
            timeout_ms,
            stage: stage.into(),
        }
    }

    /// Attaches an underlying cause to variants that carry one; other variants
    /// are returned unchanged.
    pub fn with_cause(self, cause: impl Into<String>) -> Self {
        match self {
            Self::NetworkError { message, .. } => Self::NetworkError {
                message,
                cause: Some(cause.into()),
            },
            Self::Unknown { message, .. } => Self::Unknown {
                message,
                cause: Some(cause.into()),
            },
            other => other,
        }
    }

    /// The serialized tag of the active variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FetchFailed { .. } => "fetch_failed",
            Self::Timeout { .. } => "timeout",
            Self::ParseFailed { .. } => "parse_failed",
            Self::NetworkError { .. } => "network_error",
            Self::InvalidHtml { .. } => "invalid_html",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Whether a fetch attempt that failed this way may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NetworkError { .. })
    }
}

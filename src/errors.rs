// src/errors.rs
use crate::diagnostics::IssueClass;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Geometry unavailable: {0}")]
    GeometryUnavailable(&'static str),

    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Malformed payload ({class}): {detail}")]
    Malformed { class: IssueClass, detail: String },

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Engine already disposed")]
    Disposed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OverlayError {
    pub fn malformed(class: IssueClass, detail: impl Into<String>) -> Self {
        OverlayError::Malformed {
            class,
            detail: detail.into(),
        }
    }

    pub fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        OverlayError::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Deferred-once errors. Everything else is dropped on the spot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OverlayError::GeometryUnavailable(_))
    }
}

pub type OverlayResult<T> = Result<T, OverlayError>;

//! Error types for the magistrate engine.
//!
//! All errors are explicitly typed using thiserror. No panics in production code.

use thiserror::Error;

/// Central error type for all magistrate operations.
#[derive(Debug, Error)]
pub enum MagistrateError {
    /// Configuration error (missing env vars, unknown warning level names,
    /// no active policy where one is required).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Referenced entity (user, warning, level, rule) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation rejected before any mutation (already-ignored warning,
    /// level still referenced by warnings).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Classifier API returned an error or an unparseable response.
    #[error("Classifier API error: {0}")]
    ClassifierApi(String),

    /// Rate limited by an external API.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal state error (poisoned locks, impossible transitions).
    #[error("Internal state error: {0}")]
    InternalState(String),
}

impl MagistrateError {
    /// Check if this error is critical and requires alerting.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Database(_) | Self::InternalState(_))
    }

    /// Get user-friendly error message (hides internal details).
    ///
    /// NotFound and Conflict carry admin-facing context and are safe to
    /// surface as-is; everything else maps to a generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("Configuration error: {}", msg),
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::Conflict(msg) => format!("Conflict: {}", msg),
            Self::ClassifierApi(_) => "Content analysis service temporarily unavailable".into(),
            Self::RateLimited { .. } => "Too many requests, please try again later".into(),
            Self::DiscordApi(_) => "Discord service temporarily unavailable".into(),
            Self::Http(_) => "Network error, please try again".into(),
            Self::Json(_) => "Data format error".into(),
            Self::Database(_) => "Database service temporarily unavailable".into(),
            Self::InternalState(_) => "Internal service error".into(),
        }
    }
}

/// Result type alias for magistrate operations.
pub type Result<T> = std::result::Result<T, MagistrateError>;

//! Configuration loading from environment.
//!
//! Sensitive values (tokens, keys) come from environment variables; the
//! rest have sensible defaults.

use std::env;

use crate::error::{MagistrateError, Result};

/// Default SQLite database path.
pub const DEFAULT_DATABASE_PATH: &str = "data/magistrate.db";

/// Default admin API port.
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// Default classifier rate limit (requests per minute).
pub const DEFAULT_CLASSIFIER_RPM: u32 = 60;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct MagistrateConfig {
    /// Discord bot token.
    pub discord_token: String,
    /// Gemini API key; absent disables classification (admin API still runs).
    pub gemini_api_key: Option<String>,
    /// Guild the punishment executor acts on.
    pub guild_id: u64,
    /// SQLite database path.
    pub database_path: String,
    /// Admin API port.
    pub web_port: u16,
    /// Classifier retry budget.
    pub classifier_max_attempts: u32,
    /// Classifier backoff between attempts.
    pub classifier_backoff_ms: u64,
    /// Classifier rate limit (requests per minute).
    pub classifier_rpm: u32,
    /// Messages of channel context sent to the classifier.
    pub context_depth: usize,
}

impl MagistrateConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DISCORD_TOKEN`: Discord bot token
    /// - `GUILD_ID`: guild the executor acts on
    ///
    /// Optional:
    /// - `GEMINI_API_KEY`: enables the classifier
    /// - `DATABASE_PATH`: SQLite path (default: data/magistrate.db)
    /// - `WEB_PORT`: admin API port (default: 8080)
    /// - `CLASSIFIER_MAX_ATTEMPTS`: retry budget (default: 3)
    /// - `CLASSIFIER_BACKOFF_MS`: backoff base (default: 250)
    /// - `CLASSIFIER_RPM`: rate limit (default: 60)
    /// - `CONTEXT_DEPTH`: context window size (default: 10)
    pub fn from_env() -> Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| MagistrateError::Config("DISCORD_TOKEN not set".to_string()))?;

        let guild_id = env::var("GUILD_ID")
            .map_err(|_| MagistrateError::Config("GUILD_ID not set".to_string()))?
            .parse::<u64>()
            .map_err(|_| MagistrateError::Config("GUILD_ID must be a numeric id".to_string()))?;

        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

        let web_port = env::var("WEB_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_WEB_PORT);

        let classifier_max_attempts = env::var("CLASSIFIER_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::classifier::DEFAULT_MAX_ATTEMPTS);

        let classifier_backoff_ms = env::var("CLASSIFIER_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::classifier::DEFAULT_BACKOFF_MS);

        let classifier_rpm = env::var("CLASSIFIER_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CLASSIFIER_RPM);

        let context_depth = env::var("CONTEXT_DEPTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::context::MAX_CONTEXT_MESSAGES);

        Ok(Self {
            discord_token,
            gemini_api_key,
            guild_id,
            database_path,
            web_port,
            classifier_max_attempts,
            classifier_backoff_ms,
            classifier_rpm,
            context_depth,
        })
    }
}

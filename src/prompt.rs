//! Analysis prompt configuration.
//!
//! Prompts are versioned rows: setting a new prompt inserts a row and
//! deactivates prior versions, so every classifier call reads the
//! configuration snapshot current at decision time and history is kept.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::database::{parse_ts, Database};
use crate::error::{MagistrateError, Result};

/// Built-in prompt used when no admin-configured prompt is active.
pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"You are a content moderation assistant for a Discord community. Analyze the newest message against the community's warning levels and rules.

Consider the conversational context: friendly banter between regulars is not a violation; targeted hostility is.

Respond ONLY with a JSON object in this format:
{"violation_detected": true, "level": "<exact level name>", "reason": "<brief explanation>", "rule": "<the rule that was broken>"}

If the message does not violate any rule, respond with:
{"violation_detected": false}"#;

/// A stored prompt version.
#[derive(Debug, Clone)]
pub struct AnalysisPrompt {
    pub id: i64,
    pub body: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Versioned store for the analysis prompt.
pub struct PromptStore {
    db: Arc<Database>,
}

impl PromptStore {
    /// Create a new prompt store.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Get the active prompt body, falling back to the built-in default.
    pub async fn active_body(&self) -> Result<String> {
        Ok(self
            .active()
            .await?
            .map(|p| p.body)
            .unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string()))
    }

    /// Get the active prompt version, if an admin has configured one.
    pub async fn active(&self) -> Result<Option<AnalysisPrompt>> {
        let row = sqlx::query(
            "SELECT id, body, is_active, created_by, created_at
             FROM analysis_prompts WHERE is_active = 1
             ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get prompt: {}", e)))?;

        row.map(|r| {
            Ok(AnalysisPrompt {
                id: r.get("id"),
                body: r.get("body"),
                is_active: r.get::<i64, _>("is_active") != 0,
                created_by: r.get("created_by"),
                created_at: parse_ts(r.get("created_at"), "created_at")?,
            })
        })
        .transpose()
    }

    /// Set a new active prompt, preserving prior versions.
    pub async fn set_prompt(&self, body: &str, created_by: &str) -> Result<AnalysisPrompt> {
        if body.trim().is_empty() {
            return Err(MagistrateError::Config(
                "analysis prompt must not be empty".to_string(),
            ));
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("UPDATE analysis_prompts SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                MagistrateError::Database(format!("Failed to deactivate prompts: {}", e))
            })?;

        sqlx::query(
            "INSERT INTO analysis_prompts (body, is_active, created_by, created_at)
             VALUES (?, 1, ?, ?)",
        )
        .bind(body)
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to insert prompt: {}", e)))?;

        tx.commit().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to commit transaction: {}", e))
        })?;

        self.active()
            .await?
            .ok_or_else(|| MagistrateError::InternalState("prompt vanished after insert".to_string()))
    }
}

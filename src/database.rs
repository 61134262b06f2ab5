//! SQLite database for persistent storage.
//!
//! Holds the warning ledger, user point totals, rule catalog, punishment
//! policy, punishment audit log, and analysis prompt versions.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{MagistrateError, Result};
use crate::models::{Punishment, PunishmentKind, User, Warning};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    ///
    /// Creates the database file and initializes schema if needed.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MagistrateError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                MagistrateError::Database(format!("Failed to connect to database: {}", e))
            })?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                MagistrateError::Database(format!("Failed to create in-memory db: {}", e))
            })?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Initialize database schema.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MagistrateError::Database(format!("Failed to initialize schema: {}", e))
            })?;

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MagistrateError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Fetch a user by platform id.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, total_points, is_banned, is_muted, mute_expires_at, created_at, updated_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get user: {}", e)))?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    /// Get the punishment audit log for a user, newest first.
    pub async fn get_punishments(&self, user_id: &str) -> Result<Vec<Punishment>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, reason, duration_secs, created_at, expires_at
             FROM punishments WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get punishments: {}", e)))?;

        rows.iter().map(punishment_from_row).collect()
    }
}

/// Parse an RFC3339 timestamp column.
pub(crate) fn parse_ts(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MagistrateError::Database(format!("Invalid {}: {}", column, e)))
}

/// Parse an optional RFC3339 timestamp column.
pub(crate) fn parse_opt_ts(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_ts(&s, column)).transpose()
}

/// Map a `users` row.
pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        total_points: row.get("total_points"),
        is_banned: row.get::<i64, _>("is_banned") != 0,
        is_muted: row.get::<i64, _>("is_muted") != 0,
        mute_expires_at: parse_opt_ts(row.get("mute_expires_at"), "mute_expires_at")?,
        created_at: parse_ts(row.get("created_at"), "created_at")?,
        updated_at: parse_ts(row.get("updated_at"), "updated_at")?,
    })
}

/// Map a `warnings` row.
pub(crate) fn warning_from_row(row: &SqliteRow) -> Result<Warning> {
    Ok(Warning {
        id: row.get("id"),
        user_id: row.get("user_id"),
        level_id: row.get("level_id"),
        points: row.get("points"),
        rule_text: row.get("rule_text"),
        message_content: row.get("message_content"),
        message_context: row.get("message_context"),
        message_deleted: row.get::<i64, _>("message_deleted") != 0,
        created_at: parse_ts(row.get("created_at"), "created_at")?,
        ignored: row.get::<i64, _>("ignored") != 0,
        ignored_at: parse_opt_ts(row.get("ignored_at"), "ignored_at")?,
        ignored_by: row.get("ignored_by"),
        ignore_reason: row.get("ignore_reason"),
    })
}

/// Map a `punishments` row.
pub(crate) fn punishment_from_row(row: &SqliteRow) -> Result<Punishment> {
    let kind_str: String = row.get("kind");
    let kind = PunishmentKind::parse(&kind_str)
        .ok_or_else(|| MagistrateError::Database(format!("Invalid punishment kind: {}", kind_str)))?;

    Ok(Punishment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind,
        reason: row.get("reason"),
        duration_secs: row.get("duration_secs"),
        created_at: parse_ts(row.get("created_at"), "created_at")?,
        expires_at: parse_opt_ts(row.get("expires_at"), "expires_at")?,
    })
}

/// Database schema SQL.
const SCHEMA: &str = r#"
-- Moderated users; append-only moderation record, rows are never deleted
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    total_points INTEGER NOT NULL DEFAULT 0,
    is_banned INTEGER NOT NULL DEFAULT 0,
    is_muted INTEGER NOT NULL DEFAULT 0,
    mute_expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Severity tiers
CREATE TABLE IF NOT EXISTS warning_levels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    color TEXT NOT NULL DEFAULT '#ffcc00',
    points INTEGER NOT NULL,
    delete_message INTEGER NOT NULL DEFAULT 0,
    description TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Described offenses belonging to a level
CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    sort_order INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (level_id) REFERENCES warning_levels(id)
);

-- Warning ledger; only the ignore sub-record is ever mutated
CREATE TABLE IF NOT EXISTS warnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    level_id INTEGER NOT NULL,
    points INTEGER NOT NULL,
    rule_text TEXT NOT NULL DEFAULT '',
    message_content TEXT NOT NULL DEFAULT '',
    message_context TEXT NOT NULL DEFAULT '',
    message_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    ignored INTEGER NOT NULL DEFAULT 0,
    ignored_at TEXT,
    ignored_by TEXT,
    ignore_reason TEXT,
    FOREIGN KEY (level_id) REFERENCES warning_levels(id)
);

-- Punishment policy: point threshold -> action
CREATE TABLE IF NOT EXISTS punishment_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK(kind IN ('mute', 'ban')),
    point_threshold INTEGER NOT NULL,
    duration_secs INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Append-only audit log of punishments decided
CREATE TABLE IF NOT EXISTS punishments (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('mute', 'ban')),
    reason TEXT NOT NULL,
    duration_secs INTEGER,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    expires_at TEXT
);

-- Versioned analysis prompts; at most one active row
CREATE TABLE IF NOT EXISTS analysis_prompts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_warnings_user ON warnings(user_id, ignored);
CREATE INDEX IF NOT EXISTS idx_warnings_level ON warnings(level_id);
CREATE INDEX IF NOT EXISTS idx_warnings_created ON warnings(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_rules_level_order ON rules(level_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_punishment_rules_active ON punishment_rules(is_active, point_threshold DESC);
CREATE INDEX IF NOT EXISTS idx_punishments_user ON punishments(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_prompts_active ON analysis_prompts(is_active);
"#;

#[cfg(test)]
mod tests {
    use crate::database::Database;

    #[tokio::test]
    async fn create_in_memory_database() {
        let db = Database::in_memory().await.expect("should create db");
        db.health_check().await.expect("health check should pass");
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let db = Database::in_memory().await.expect("should create db");

        // Initialize schema again (should not fail)
        db.initialize_schema().await.expect("should be idempotent");
        db.health_check().await.expect("health check should pass");
    }

    #[tokio::test]
    async fn file_backed_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("should create tempdir");
        let path = dir.path().join("nested").join("magistrate.db");

        let db = Database::new(path.to_str().expect("utf-8 path"))
            .await
            .expect("should create file-backed db");
        db.health_check().await.expect("health check should pass");

        assert!(path.exists());
    }

    #[tokio::test]
    async fn get_unknown_user_returns_none() {
        let db = Database::in_memory().await.expect("should create db");

        let user = db.get_user("nope").await.expect("should not error");
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn punishments_empty_for_unknown_user() {
        let db = Database::in_memory().await.expect("should create db");

        let punishments = db.get_punishments("nope").await.expect("should not error");
        assert!(punishments.is_empty());
    }
}

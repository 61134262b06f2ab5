//! Warning-level and rule catalog.
//!
//! Stores the severity tiers and the described offenses under each tier,
//! and renders them for inclusion in classifier prompts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::sync::RwLock;

use crate::database::{parse_ts, Database};
use crate::error::{MagistrateError, Result};
use crate::models::{Rule, WarningLevel};

/// Fields accepted when creating a warning level.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLevel {
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
    pub points: i64,
    #[serde(default)]
    pub delete_message: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial update for a warning level.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LevelPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub points: Option<i64>,
    pub delete_message: Option<bool>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

/// Fields accepted when creating a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub level_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial update for a rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub level_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
    pub enabled: Option<bool>,
}

fn default_color() -> String {
    "#ffcc00".to_string()
}

fn default_true() -> bool {
    true
}

/// Catalog of warning levels and their rules.
pub struct RuleCatalog {
    db: Arc<Database>,
    /// Lowercased level name -> level, for hot-path verdict resolution.
    level_cache: Arc<RwLock<HashMap<String, WarningLevel>>>,
}

impl RuleCatalog {
    /// Create a new catalog.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            level_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ========== Warning levels ==========

    /// Create a warning level.
    pub async fn create_level(&self, new: NewLevel) -> Result<WarningLevel> {
        if new.points <= 0 {
            return Err(MagistrateError::Config(
                "level points must be a positive integer".to_string(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(MagistrateError::Config(
                "level name must not be empty".to_string(),
            ));
        }

        if self.find_level_by_name(&new.name).await?.is_some() {
            return Err(MagistrateError::Conflict(format!(
                "warning level '{}' already exists",
                new.name
            )));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO warning_levels (name, color, points, delete_message, description, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.name.trim())
        .bind(&new.color)
        .bind(new.points)
        .bind(new.delete_message as i64)
        .bind(&new.description)
        .bind(new.enabled as i64)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to create level: {}", e)))?;

        self.invalidate_cache().await;

        self.get_level(result.last_insert_rowid())
            .await?
            .ok_or_else(|| MagistrateError::InternalState("level vanished after insert".to_string()))
    }

    /// Get a warning level by id.
    pub async fn get_level(&self, id: i64) -> Result<Option<WarningLevel>> {
        let row = sqlx::query(
            "SELECT id, name, color, points, delete_message, description, enabled, created_at, updated_at
             FROM warning_levels WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get level: {}", e)))?;

        row.map(|r| level_from_row(&r)).transpose()
    }

    /// Find a warning level by name, case-insensitively.
    ///
    /// This is the hot-path lookup used to resolve classifier verdicts.
    pub async fn find_level_by_name(&self, name: &str) -> Result<Option<WarningLevel>> {
        let key = name.trim().to_lowercase();

        {
            let cache = self.level_cache.read().await;
            if !cache.is_empty() {
                return Ok(cache.get(&key).cloned());
            }
        }

        let levels = self.list_levels(true).await?;
        let mut cache = self.level_cache.write().await;
        cache.clear();
        for level in levels {
            cache.insert(level.name.to_lowercase(), level);
        }

        Ok(cache.get(&key).cloned())
    }

    /// List warning levels ordered by point weight.
    pub async fn list_levels(&self, include_disabled: bool) -> Result<Vec<WarningLevel>> {
        let query = if include_disabled {
            "SELECT id, name, color, points, delete_message, description, enabled, created_at, updated_at
             FROM warning_levels ORDER BY points ASC, name ASC"
        } else {
            "SELECT id, name, color, points, delete_message, description, enabled, created_at, updated_at
             FROM warning_levels WHERE enabled = 1 ORDER BY points ASC, name ASC"
        };

        let rows = sqlx::query(query)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to list levels: {}", e)))?;

        rows.iter().map(level_from_row).collect()
    }

    /// Update a warning level.
    pub async fn update_level(&self, id: i64, patch: LevelPatch) -> Result<WarningLevel> {
        let mut level = self
            .get_level(id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("warning level {}", id)))?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(MagistrateError::Config(
                    "level name must not be empty".to_string(),
                ));
            }
            if let Some(existing) = self.find_level_by_name(&name).await? {
                if existing.id != id {
                    return Err(MagistrateError::Conflict(format!(
                        "warning level '{}' already exists",
                        name
                    )));
                }
            }
            level.name = name.trim().to_string();
        }
        if let Some(color) = patch.color {
            level.color = color;
        }
        if let Some(points) = patch.points {
            if points <= 0 {
                return Err(MagistrateError::Config(
                    "level points must be a positive integer".to_string(),
                ));
            }
            level.points = points;
        }
        if let Some(delete_message) = patch.delete_message {
            level.delete_message = delete_message;
        }
        if let Some(description) = patch.description {
            level.description = description;
        }
        if let Some(enabled) = patch.enabled {
            level.enabled = enabled;
        }

        sqlx::query(
            "UPDATE warning_levels SET name = ?, color = ?, points = ?, delete_message = ?, description = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&level.name)
        .bind(&level.color)
        .bind(level.points)
        .bind(level.delete_message as i64)
        .bind(&level.description)
        .bind(level.enabled as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to update level: {}", e)))?;

        self.invalidate_cache().await;

        self.get_level(id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("warning level {}", id)))
    }

    /// Delete a warning level and its rules.
    ///
    /// Refused while any warning references the level, to preserve the
    /// audit trail.
    pub async fn delete_level(&self, id: i64) -> Result<()> {
        if self.get_level(id).await?.is_none() {
            return Err(MagistrateError::NotFound(format!("warning level {}", id)));
        }

        let referencing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM warnings WHERE level_id = ?")
                .bind(id)
                .fetch_one(self.db.pool())
                .await
                .map_err(|e| {
                    MagistrateError::Database(format!("Failed to count references: {}", e))
                })?;

        if referencing > 0 {
            return Err(MagistrateError::Conflict(format!(
                "warning level {} is still referenced by {} warnings",
                id, referencing
            )));
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query("DELETE FROM rules WHERE level_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to delete rules: {}", e)))?;

        sqlx::query("DELETE FROM warning_levels WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to delete level: {}", e)))?;

        tx.commit().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to commit transaction: {}", e))
        })?;

        self.invalidate_cache().await;

        Ok(())
    }

    // ========== Rules ==========

    /// Create a rule under a level.
    pub async fn create_rule(&self, new: NewRule) -> Result<Rule> {
        if self.get_level(new.level_id).await?.is_none() {
            return Err(MagistrateError::NotFound(format!(
                "warning level {}",
                new.level_id
            )));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO rules (level_id, name, description, sort_order, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.level_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.sort_order)
        .bind(new.enabled as i64)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to create rule: {}", e)))?;

        self.get_rule(result.last_insert_rowid())
            .await?
            .ok_or_else(|| MagistrateError::InternalState("rule vanished after insert".to_string()))
    }

    /// Get a rule by id.
    pub async fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let row = sqlx::query(
            "SELECT id, level_id, name, description, sort_order, enabled, created_at, updated_at
             FROM rules WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get rule: {}", e)))?;

        row.map(|r| rule_from_row(&r)).transpose()
    }

    /// List rules, optionally restricted to one level, in display order.
    pub async fn list_rules(&self, level_id: Option<i64>) -> Result<Vec<Rule>> {
        let rows = match level_id {
            Some(level_id) => sqlx::query(
                "SELECT id, level_id, name, description, sort_order, enabled, created_at, updated_at
                 FROM rules WHERE level_id = ? ORDER BY sort_order ASC, id ASC",
            )
            .bind(level_id)
            .fetch_all(self.db.pool())
            .await,
            None => sqlx::query(
                "SELECT id, level_id, name, description, sort_order, enabled, created_at, updated_at
                 FROM rules ORDER BY level_id ASC, sort_order ASC, id ASC",
            )
            .fetch_all(self.db.pool())
            .await,
        }
        .map_err(|e| MagistrateError::Database(format!("Failed to list rules: {}", e)))?;

        rows.iter().map(rule_from_row).collect()
    }

    /// Update a rule.
    pub async fn update_rule(&self, id: i64, patch: RulePatch) -> Result<Rule> {
        let mut rule = self
            .get_rule(id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("rule {}", id)))?;

        if let Some(level_id) = patch.level_id {
            if self.get_level(level_id).await?.is_none() {
                return Err(MagistrateError::NotFound(format!(
                    "warning level {}",
                    level_id
                )));
            }
            rule.level_id = level_id;
        }
        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(description) = patch.description {
            rule.description = description;
        }
        if let Some(sort_order) = patch.sort_order {
            rule.sort_order = sort_order;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }

        sqlx::query(
            "UPDATE rules SET level_id = ?, name = ?, description = ?, sort_order = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(rule.level_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.sort_order)
        .bind(rule.enabled as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to update rule: {}", e)))?;

        self.get_rule(id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("rule {}", id)))
    }

    /// Delete a rule. Rules may be freely deleted.
    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to delete rule: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(MagistrateError::NotFound(format!("rule {}", id)));
        }

        Ok(())
    }

    /// Reorder the rules of a level: `ordered_ids` becomes the new display
    /// sequence. Every id must belong to the level.
    pub async fn reorder_rules(&self, level_id: i64, ordered_ids: &[i64]) -> Result<Vec<Rule>> {
        let existing = self.list_rules(Some(level_id)).await?;
        if existing.is_empty() && !ordered_ids.is_empty() {
            return Err(MagistrateError::NotFound(format!(
                "warning level {} has no rules",
                level_id
            )));
        }

        for id in ordered_ids {
            if !existing.iter().any(|r| r.id == *id) {
                return Err(MagistrateError::Conflict(format!(
                    "rule {} does not belong to level {}",
                    id, level_id
                )));
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to begin transaction: {}", e))
        })?;

        let now = Utc::now().to_rfc3339();
        for (position, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE rules SET sort_order = ?, updated_at = ? WHERE id = ?")
                .bind(position as i64)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    MagistrateError::Database(format!("Failed to reorder rule: {}", e))
                })?;
        }

        tx.commit().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to commit transaction: {}", e))
        })?;

        self.list_rules(Some(level_id)).await
    }

    /// Render the enabled catalog for inclusion in a classifier prompt.
    pub async fn render_for_prompt(&self) -> Result<String> {
        let levels = self.list_levels(false).await?;
        let rules = self.list_rules(None).await?;

        let mut parts = Vec::new();
        parts.push("## Warning Levels and Rules".to_string());
        parts.push(
            "Classify violations against one of the following levels. \
             Respond with the exact level name."
                .to_string(),
        );
        parts.push(String::new());

        for level in &levels {
            parts.push(format!(
                "### {} ({} points){}",
                level.name,
                level.points,
                if level.description.is_empty() {
                    String::new()
                } else {
                    format!(" - {}", level.description)
                }
            ));
            for rule in rules
                .iter()
                .filter(|r| r.level_id == level.id && r.enabled)
            {
                if rule.description.is_empty() {
                    parts.push(format!("- {}", rule.name));
                } else {
                    parts.push(format!("- {}: {}", rule.name, rule.description));
                }
            }
            parts.push(String::new());
        }

        Ok(parts.join("\n"))
    }

    /// Invalidate the level-name cache.
    pub async fn invalidate_cache(&self) {
        let mut cache = self.level_cache.write().await;
        cache.clear();
    }
}

/// Map a `warning_levels` row.
fn level_from_row(row: &SqliteRow) -> Result<WarningLevel> {
    Ok(WarningLevel {
        id: row.get("id"),
        name: row.get("name"),
        color: row.get("color"),
        points: row.get("points"),
        delete_message: row.get::<i64, _>("delete_message") != 0,
        description: row.get("description"),
        enabled: row.get::<i64, _>("enabled") != 0,
        created_at: parse_ts(row.get("created_at"), "created_at")?,
        updated_at: parse_ts(row.get("updated_at"), "updated_at")?,
    })
}

/// Map a `rules` row.
fn rule_from_row(row: &SqliteRow) -> Result<Rule> {
    Ok(Rule {
        id: row.get("id"),
        level_id: row.get("level_id"),
        name: row.get("name"),
        description: row.get("description"),
        sort_order: row.get("sort_order"),
        enabled: row.get::<i64, _>("enabled") != 0,
        created_at: parse_ts(row.get("created_at"), "created_at")?,
        updated_at: parse_ts(row.get("updated_at"), "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::catalog::{LevelPatch, NewLevel, NewRule, RuleCatalog, RulePatch};
    use crate::database::Database;
    use crate::error::MagistrateError;

    fn level(name: &str, points: i64) -> NewLevel {
        NewLevel {
            name: name.to_string(),
            color: "#ff0000".to_string(),
            points,
            delete_message: false,
            description: String::new(),
            enabled: true,
        }
    }

    async fn catalog() -> RuleCatalog {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        RuleCatalog::new(db)
    }

    #[tokio::test]
    async fn create_and_find_level_case_insensitive() {
        let catalog = catalog().await;

        let created = catalog
            .create_level(level("Orange", 3))
            .await
            .expect("should create");
        assert_eq!(created.points, 3);

        let found = catalog
            .find_level_by_name("orange")
            .await
            .expect("should query")
            .expect("should find");
        assert_eq!(found.id, created.id);

        let found = catalog
            .find_level_by_name("  ORANGE ")
            .await
            .expect("should query")
            .expect("should find");
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn duplicate_level_name_is_conflict() {
        let catalog = catalog().await;

        catalog
            .create_level(level("red", 5))
            .await
            .expect("should create");

        let err = catalog
            .create_level(level("RED", 7))
            .await
            .expect_err("should reject duplicate");
        assert!(matches!(err, MagistrateError::Conflict(_)));
    }

    #[tokio::test]
    async fn nonpositive_points_rejected() {
        let catalog = catalog().await;

        let err = catalog
            .create_level(level("zero", 0))
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Config(_)));

        let err = catalog
            .create_level(level("negative", -3))
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Config(_)));
    }

    #[tokio::test]
    async fn update_level_points_does_not_touch_other_fields() {
        let catalog = catalog().await;

        let created = catalog
            .create_level(level("yellow", 1))
            .await
            .expect("should create");

        let updated = catalog
            .update_level(
                created.id,
                LevelPatch {
                    points: Some(2),
                    ..Default::default()
                },
            )
            .await
            .expect("should update");

        assert_eq!(updated.points, 2);
        assert_eq!(updated.name, "yellow");
        assert_eq!(updated.color, "#ff0000");
    }

    #[tokio::test]
    async fn update_unknown_level_is_not_found() {
        let catalog = catalog().await;

        let err = catalog
            .update_level(999, LevelPatch::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, MagistrateError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_level_cascades_rules() {
        let catalog = catalog().await;

        let lvl = catalog
            .create_level(level("green", 1))
            .await
            .expect("should create");
        catalog
            .create_rule(NewRule {
                level_id: lvl.id,
                name: "No spam".to_string(),
                description: String::new(),
                sort_order: 0,
                enabled: true,
            })
            .await
            .expect("should create rule");

        catalog.delete_level(lvl.id).await.expect("should delete");

        let rules = catalog.list_rules(None).await.expect("should list");
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn delete_level_refused_while_warnings_reference_it() {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let catalog = RuleCatalog::new(db.clone());

        let lvl = catalog
            .create_level(level("orange", 3))
            .await
            .expect("should create");

        // A warning holds a reference to the level
        sqlx::query(
            "INSERT INTO warnings (user_id, level_id, points, created_at) VALUES ('u1', ?, 3, ?)",
        )
        .bind(lvl.id)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(db.pool())
        .await
        .expect("should insert warning");

        let err = catalog
            .delete_level(lvl.id)
            .await
            .expect_err("should refuse");
        assert!(matches!(err, MagistrateError::Conflict(_)));

        // The level survives
        assert!(catalog
            .get_level(lvl.id)
            .await
            .expect("should query")
            .is_some());
    }

    #[tokio::test]
    async fn rule_crud_and_reorder() {
        let catalog = catalog().await;

        let lvl = catalog
            .create_level(level("orange", 3))
            .await
            .expect("should create level");

        let a = catalog
            .create_rule(NewRule {
                level_id: lvl.id,
                name: "No insults".to_string(),
                description: "Direct personal attacks".to_string(),
                sort_order: 0,
                enabled: true,
            })
            .await
            .expect("should create");
        let b = catalog
            .create_rule(NewRule {
                level_id: lvl.id,
                name: "No baiting".to_string(),
                description: String::new(),
                sort_order: 1,
                enabled: true,
            })
            .await
            .expect("should create");

        // Swap the display order
        let reordered = catalog
            .reorder_rules(lvl.id, &[b.id, a.id])
            .await
            .expect("should reorder");
        assert_eq!(reordered[0].id, b.id);
        assert_eq!(reordered[1].id, a.id);

        // Rename one
        let renamed = catalog
            .update_rule(
                a.id,
                RulePatch {
                    name: Some("No personal attacks".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("should update");
        assert_eq!(renamed.name, "No personal attacks");

        // Rules delete freely
        catalog.delete_rule(b.id).await.expect("should delete");
        let remaining = catalog
            .list_rules(Some(lvl.id))
            .await
            .expect("should list");
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn reorder_rejects_foreign_rule() {
        let catalog = catalog().await;

        let lvl_a = catalog
            .create_level(level("a", 1))
            .await
            .expect("should create");
        let lvl_b = catalog
            .create_level(level("b", 2))
            .await
            .expect("should create");

        let rule_a = catalog
            .create_rule(NewRule {
                level_id: lvl_a.id,
                name: "rule a".to_string(),
                description: String::new(),
                sort_order: 0,
                enabled: true,
            })
            .await
            .expect("should create");
        let rule_b = catalog
            .create_rule(NewRule {
                level_id: lvl_b.id,
                name: "rule b".to_string(),
                description: String::new(),
                sort_order: 0,
                enabled: true,
            })
            .await
            .expect("should create");

        let err = catalog
            .reorder_rules(lvl_a.id, &[rule_a.id, rule_b.id])
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Conflict(_)));
    }

    #[tokio::test]
    async fn render_for_prompt_lists_enabled_only() {
        let catalog = catalog().await;

        let lvl = catalog
            .create_level(level("red", 5))
            .await
            .expect("should create");
        catalog
            .create_rule(NewRule {
                level_id: lvl.id,
                name: "No threats".to_string(),
                description: "Threats of violence".to_string(),
                sort_order: 0,
                enabled: true,
            })
            .await
            .expect("should create");
        catalog
            .create_rule(NewRule {
                level_id: lvl.id,
                name: "Hidden rule".to_string(),
                description: String::new(),
                sort_order: 1,
                enabled: false,
            })
            .await
            .expect("should create");

        let rendered = catalog.render_for_prompt().await.expect("should render");
        assert!(rendered.contains("red (5 points)"));
        assert!(rendered.contains("No threats: Threats of violence"));
        assert!(!rendered.contains("Hidden rule"));
    }

    #[tokio::test]
    async fn cache_invalidated_on_update() {
        let catalog = catalog().await;

        let lvl = catalog
            .create_level(level("amber", 2))
            .await
            .expect("should create");

        // Warm the cache
        let _ = catalog
            .find_level_by_name("amber")
            .await
            .expect("should query");

        catalog
            .update_level(
                lvl.id,
                LevelPatch {
                    name: Some("gold".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("should update");

        assert!(catalog
            .find_level_by_name("amber")
            .await
            .expect("should query")
            .is_none());
        assert!(catalog
            .find_level_by_name("gold")
            .await
            .expect("should query")
            .is_some());
    }
}

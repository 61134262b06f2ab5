//! Warning ledger and scoring engine.
//!
//! Converts classifier verdicts into warning records, maintains each
//! user's cumulative point total, and decides punishments against the
//! active policy. Keeps ledger, total, and punishment status consistent
//! under concurrent writes and retroactive corrections.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::Mutex;

use crate::catalog::RuleCatalog;
use crate::database::{warning_from_row, Database};
use crate::error::{MagistrateError, Result};
use crate::models::{PunishmentDecision, PunishmentKind, User, Warning, WarningOutcome};
use crate::policy::{applicable_rule, applicable_rule_of_kind, PunishmentPolicy};

/// Actor recorded on system-initiated ignores.
const SYSTEM_ACTOR: &str = "system";

/// A warning to be recorded against a user.
#[derive(Debug, Clone)]
pub struct RecordWarning {
    pub user_id: String,
    pub username: String,
    pub level_name: String,
    pub rule_text: String,
    pub message_content: String,
    pub message_context: String,
}

/// Result of ignoring a warning.
#[derive(Debug, Clone, Serialize)]
pub struct IgnoreOutcome {
    pub warning: Warning,
    pub new_total: i64,
    /// Punishment kinds no longer justified by any active rule.
    pub lifted: Vec<PunishmentKind>,
}

/// Result of a full recalculation.
#[derive(Debug, Clone, Serialize)]
pub struct RecalcOutcome {
    pub user: User,
    pub granted: Vec<PunishmentDecision>,
    pub lifted: Vec<PunishmentKind>,
}

/// Result of resetting a user's warnings.
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub user: User,
    pub ignored_count: u64,
    pub lifted: Vec<PunishmentKind>,
}

/// Scoring engine over the warning ledger.
///
/// Every mutating operation runs under a per-user async lock plus a
/// database transaction, so concurrent warnings for the same user cannot
/// lose point updates. Different users proceed in parallel.
pub struct ScoringEngine {
    db: Arc<Database>,
    catalog: Arc<RuleCatalog>,
    policy: Arc<PunishmentPolicy>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ScoringEngine {
    /// Create a new scoring engine.
    pub fn new(db: Arc<Database>, catalog: Arc<RuleCatalog>, policy: Arc<PunishmentPolicy>) -> Self {
        Self {
            db,
            catalog,
            policy,
            user_locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a warning and decide any punishment it triggers.
    ///
    /// Unknown level names are a configuration error: the classifier and
    /// the catalog are out of sync. No mutation occurs in that case.
    pub async fn record_warning(&self, req: RecordWarning) -> Result<WarningOutcome> {
        let level = self
            .catalog
            .find_level_by_name(&req.level_name)
            .await?
            .ok_or_else(|| {
                MagistrateError::Config(format!(
                    "classifier returned unknown warning level '{}'",
                    req.level_name
                ))
            })?;

        // Policy snapshot read at decision time
        let rules = self.policy.active_rules().await?;

        let lock = self.user_lock(&req.user_id);
        let _guard = lock.lock().await;

        let mut tx = self.begin().await?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // First offense creates the user row; repeat offenses refresh the
        // display name.
        sqlx::query(
            "INSERT INTO users (id, username, total_points, is_banned, is_muted, created_at, updated_at)
             VALUES (?, ?, 0, 0, 0, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                updated_at = excluded.updated_at",
        )
        .bind(&req.user_id)
        .bind(&req.username)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to upsert user: {}", e)))?;

        let row = sqlx::query("SELECT total_points, is_banned, is_muted FROM users WHERE id = ?")
            .bind(&req.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to read user: {}", e)))?;

        let total: i64 = row.get("total_points");
        let was_banned = row.get::<i64, _>("is_banned") != 0;
        let was_muted = row.get::<i64, _>("is_muted") != 0;

        // Point value is snapshotted; later level edits do not reprice
        // existing warnings.
        let result = sqlx::query(
            "INSERT INTO warnings (user_id, level_id, points, rule_text, message_content, message_context, message_deleted, created_at, ignored)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&req.user_id)
        .bind(level.id)
        .bind(level.points)
        .bind(&req.rule_text)
        .bind(&req.message_content)
        .bind(&req.message_context)
        .bind(level.delete_message as i64)
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to insert warning: {}", e)))?;

        let warning_id = result.last_insert_rowid();
        let new_total = total + level.points;

        let mut is_banned = was_banned;
        let mut is_muted = was_muted;
        let mut mute_expires_at: Option<DateTime<Utc>> = None;
        let mut punishment: Option<PunishmentDecision> = None;

        match applicable_rule(new_total, &rules) {
            Some(rule) if rule.kind == PunishmentKind::Ban => {
                // Ban supersedes mute but does not erase the mute flag.
                is_banned = true;
                let decision = PunishmentDecision {
                    kind: PunishmentKind::Ban,
                    point_threshold: rule.point_threshold,
                    duration_secs: None,
                    expires_at: None,
                    reason: format!(
                        "{} points reached ban threshold {}",
                        new_total, rule.point_threshold
                    ),
                };
                insert_punishment(&mut tx, &req.user_id, &decision, now).await?;
                punishment = Some(decision);
            }
            Some(rule) if !was_muted => {
                let duration = rule.duration_secs.unwrap_or(0);
                let expires = now + Duration::seconds(duration);
                is_muted = true;
                mute_expires_at = Some(expires);
                let decision = PunishmentDecision {
                    kind: PunishmentKind::Mute,
                    point_threshold: rule.point_threshold,
                    duration_secs: rule.duration_secs,
                    expires_at: Some(expires),
                    reason: format!(
                        "{} points reached mute threshold {}",
                        new_total, rule.point_threshold
                    ),
                };
                insert_punishment(&mut tx, &req.user_id, &decision, now).await?;
                punishment = Some(decision);
            }
            // Already muted, or no threshold met: recording never removes
            // an existing punishment.
            _ => {}
        }

        if let Some(expires) = mute_expires_at {
            sqlx::query(
                "UPDATE users SET total_points = ?, is_banned = ?, is_muted = ?, mute_expires_at = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_total)
            .bind(is_banned as i64)
            .bind(is_muted as i64)
            .bind(expires.to_rfc3339())
            .bind(&now_str)
            .bind(&req.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to update user: {}", e)))?;
        } else {
            sqlx::query(
                "UPDATE users SET total_points = ?, is_banned = ?, is_muted = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_total)
            .bind(is_banned as i64)
            .bind(is_muted as i64)
            .bind(&now_str)
            .bind(&req.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to update user: {}", e)))?;
        }

        self.commit(tx).await?;

        tracing::info!(
            user_id = %req.user_id,
            level = %level.name,
            points = level.points,
            new_total = new_total,
            punishment = ?punishment.as_ref().map(|p| p.kind),
            "Warning recorded"
        );

        Ok(WarningOutcome {
            warning_id,
            level_name: level.name,
            points_added: level.points,
            new_total,
            delete_message: level.delete_message,
            punishment,
        })
    }

    /// Ignore a warning, subtracting its points and clearing any
    /// punishment status no active rule justifies anymore.
    ///
    /// Re-ignoring is rejected so each ignore keeps a single accountable
    /// reviewer and reason. The reversal path never grants or refreshes a
    /// punishment; it only removes status that lost its justification.
    pub async fn ignore_warning(
        &self,
        warning_id: i64,
        reviewer: &str,
        reason: &str,
    ) -> Result<IgnoreOutcome> {
        let warning = self
            .get_warning(warning_id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("warning {}", warning_id)))?;

        if warning.ignored {
            return Err(MagistrateError::Conflict(format!(
                "warning {} is already ignored",
                warning_id
            )));
        }

        let rules = self.policy.active_rules().await?;

        let lock = self.user_lock(&warning.user_id);
        let _guard = lock.lock().await;

        let mut tx = self.begin().await?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Guarded update: loses the race cleanly if another reviewer got
        // here first.
        let result = sqlx::query(
            "UPDATE warnings SET ignored = 1, ignored_at = ?, ignored_by = ?, ignore_reason = ?
             WHERE id = ? AND ignored = 0",
        )
        .bind(&now_str)
        .bind(reviewer)
        .bind(reason)
        .bind(warning_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to ignore warning: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(MagistrateError::Conflict(format!(
                "warning {} is already ignored",
                warning_id
            )));
        }

        let row = sqlx::query("SELECT total_points, is_banned, is_muted FROM users WHERE id = ?")
            .bind(&warning.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to read user: {}", e)))?
            .ok_or_else(|| MagistrateError::NotFound(format!("user {}", warning.user_id)))?;

        let total: i64 = row.get("total_points");
        let was_banned = row.get::<i64, _>("is_banned") != 0;
        let was_muted = row.get::<i64, _>("is_muted") != 0;

        let new_total = total - warning.points;

        let mut lifted = Vec::new();
        let mut is_banned = was_banned;
        let mut is_muted = was_muted;

        if was_banned && applicable_rule_of_kind(new_total, PunishmentKind::Ban, &rules).is_none() {
            is_banned = false;
            lifted.push(PunishmentKind::Ban);
        }
        if was_muted && applicable_rule_of_kind(new_total, PunishmentKind::Mute, &rules).is_none() {
            is_muted = false;
            lifted.push(PunishmentKind::Mute);
        }

        if is_muted {
            sqlx::query(
                "UPDATE users SET total_points = ?, is_banned = ?, is_muted = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_total)
            .bind(is_banned as i64)
            .bind(is_muted as i64)
            .bind(&now_str)
            .bind(&warning.user_id)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                "UPDATE users SET total_points = ?, is_banned = ?, is_muted = 0, mute_expires_at = NULL, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_total)
            .bind(is_banned as i64)
            .bind(&now_str)
            .bind(&warning.user_id)
            .execute(&mut *tx)
            .await
        }
        .map_err(|e| MagistrateError::Database(format!("Failed to update user: {}", e)))?;

        self.commit(tx).await?;

        tracing::info!(
            warning_id = warning_id,
            user_id = %warning.user_id,
            reviewer = %reviewer,
            new_total = new_total,
            lifted = ?lifted,
            "Warning ignored"
        );

        let mut updated = warning;
        updated.ignored = true;
        updated.ignored_at = Some(now);
        updated.ignored_by = Some(reviewer.to_string());
        updated.ignore_reason = Some(reason.to_string());

        Ok(IgnoreOutcome {
            warning: updated,
            new_total,
            lifted,
        })
    }

    /// Rebuild a user's point total from the ledger and re-derive
    /// punishment status from the current active rule set.
    ///
    /// The authoritative resync: corrects drift from partial failures and
    /// reflects policy changes made since the last warning. Can both grant
    /// and revoke punishments. Mute expiry is freshly computed from now.
    pub async fn recalculate(&self, user_id: &str) -> Result<RecalcOutcome> {
        let rules = self.policy.active_rules().await?;

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT is_banned, is_muted FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to read user: {}", e)))?
            .ok_or_else(|| MagistrateError::NotFound(format!("user {}", user_id)))?;

        let was_banned = row.get::<i64, _>("is_banned") != 0;
        let was_muted = row.get::<i64, _>("is_muted") != 0;

        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0) FROM warnings WHERE user_id = ? AND ignored = 0",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to sum warnings: {}", e)))?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let ban_rule = applicable_rule_of_kind(total, PunishmentKind::Ban, &rules);
        let mute_rule = applicable_rule_of_kind(total, PunishmentKind::Mute, &rules);

        let is_banned = ban_rule.is_some();
        let is_muted = mute_rule.is_some();
        let mute_expires_at =
            mute_rule.map(|r| now + Duration::seconds(r.duration_secs.unwrap_or(0)));

        let mut granted = Vec::new();
        let mut lifted = Vec::new();

        if let (Some(rule), false) = (ban_rule, was_banned) {
            let decision = PunishmentDecision {
                kind: PunishmentKind::Ban,
                point_threshold: rule.point_threshold,
                duration_secs: None,
                expires_at: None,
                reason: format!(
                    "recalculation: {} points meets ban threshold {}",
                    total, rule.point_threshold
                ),
            };
            insert_punishment(&mut tx, user_id, &decision, now).await?;
            granted.push(decision);
        }
        if let (Some(rule), false) = (mute_rule, was_muted) {
            let decision = PunishmentDecision {
                kind: PunishmentKind::Mute,
                point_threshold: rule.point_threshold,
                duration_secs: rule.duration_secs,
                expires_at: mute_expires_at,
                reason: format!(
                    "recalculation: {} points meets mute threshold {}",
                    total, rule.point_threshold
                ),
            };
            insert_punishment(&mut tx, user_id, &decision, now).await?;
            granted.push(decision);
        }
        if !is_banned && was_banned {
            lifted.push(PunishmentKind::Ban);
        }
        if !is_muted && was_muted {
            lifted.push(PunishmentKind::Mute);
        }

        sqlx::query(
            "UPDATE users SET total_points = ?, is_banned = ?, is_muted = ?, mute_expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(total)
        .bind(is_banned as i64)
        .bind(is_muted as i64)
        .bind(mute_expires_at.map(|dt| dt.to_rfc3339()))
        .bind(&now_str)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to update user: {}", e)))?;

        self.commit(tx).await?;

        tracing::info!(
            user_id = %user_id,
            total = total,
            granted = granted.len(),
            lifted = ?lifted,
            "User recalculated"
        );

        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("user {}", user_id)))?;

        Ok(RecalcOutcome {
            user,
            granted,
            lifted,
        })
    }

    /// Ignore every non-ignored warning for a user, zero their total, and
    /// clear punishment status. Audit rows are preserved.
    pub async fn reset_warnings(&self, user_id: &str) -> Result<ResetOutcome> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT is_banned, is_muted FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MagistrateError::Database(format!("Failed to read user: {}", e)))?
            .ok_or_else(|| MagistrateError::NotFound(format!("user {}", user_id)))?;

        let was_banned = row.get::<i64, _>("is_banned") != 0;
        let was_muted = row.get::<i64, _>("is_muted") != 0;

        let now_str = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE warnings SET ignored = 1, ignored_at = ?, ignored_by = ?, ignore_reason = 'reset'
             WHERE user_id = ? AND ignored = 0",
        )
        .bind(&now_str)
        .bind(SYSTEM_ACTOR)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to reset warnings: {}", e)))?;

        sqlx::query(
            "UPDATE users SET total_points = 0, is_banned = 0, is_muted = 0, mute_expires_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(&now_str)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to reset user: {}", e)))?;

        self.commit(tx).await?;

        let mut lifted = Vec::new();
        if was_banned {
            lifted.push(PunishmentKind::Ban);
        }
        if was_muted {
            lifted.push(PunishmentKind::Mute);
        }

        tracing::info!(
            user_id = %user_id,
            ignored = result.rows_affected(),
            lifted = ?lifted,
            "Warnings reset"
        );

        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("user {}", user_id)))?;

        Ok(ResetOutcome {
            user,
            ignored_count: result.rows_affected(),
            lifted,
        })
    }

    /// Get a warning by id.
    pub async fn get_warning(&self, warning_id: i64) -> Result<Option<Warning>> {
        let row = sqlx::query(
            "SELECT id, user_id, level_id, points, rule_text, message_content, message_context,
                    message_deleted, created_at, ignored, ignored_at, ignored_by, ignore_reason
             FROM warnings WHERE id = ?",
        )
        .bind(warning_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get warning: {}", e)))?;

        row.map(|r| warning_from_row(&r)).transpose()
    }

    /// List warnings newest first, optionally filtered to one user.
    pub async fn list_warnings(
        &self,
        user_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Warning>> {
        let rows = match user_id {
            Some(user_id) => sqlx::query(
                "SELECT id, user_id, level_id, points, rule_text, message_content, message_context,
                        message_deleted, created_at, ignored, ignored_at, ignored_by, ignore_reason
                 FROM warnings WHERE user_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(user_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.db.pool())
            .await,
            None => sqlx::query(
                "SELECT id, user_id, level_id, points, rule_text, message_content, message_context,
                        message_deleted, created_at, ignored, ignored_at, ignored_by, ignore_reason
                 FROM warnings
                 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.db.pool())
            .await,
        }
        .map_err(|e| MagistrateError::Database(format!("Failed to list warnings: {}", e)))?;

        rows.iter().map(warning_from_row).collect()
    }

    /// Get a user with their current totals and status.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.db.get_user(user_id).await
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        self.db.pool().begin().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to begin transaction: {}", e))
        })
    }

    async fn commit(&self, tx: Transaction<'_, Sqlite>) -> Result<()> {
        tx.commit().await.map_err(|e| {
            MagistrateError::Database(format!("Failed to commit transaction: {}", e))
        })
    }
}

/// Append a punishment audit row inside the caller's transaction.
async fn insert_punishment(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    decision: &PunishmentDecision,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO punishments (id, user_id, kind, reason, duration_secs, created_at, expires_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(decision.kind.as_str())
    .bind(&decision.reason)
    .bind(decision.duration_secs)
    .bind(now.to_rfc3339())
    .bind(decision.expires_at.map(|dt| dt.to_rfc3339()))
    .execute(&mut **tx)
    .await
    .map_err(|e| MagistrateError::Database(format!("Failed to insert punishment: {}", e)))?;

    Ok(())
}

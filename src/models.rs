//! Core data models for the magistrate engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A moderated community member and their running penalty state.
///
/// `total_points` always equals the sum of `points` over the user's
/// non-ignored warnings; the scoring engine maintains this on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Platform user id (stable external key).
    pub id: String,
    pub username: String,
    pub total_points: i64,
    pub is_banned: bool,
    pub is_muted: bool,
    pub mute_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Severity tier that rules belong to and warnings snapshot from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningLevel {
    pub id: i64,
    /// Unique name, matched case-insensitively against classifier verdicts.
    pub name: String,
    /// Display color for the dashboard.
    pub color: String,
    /// Positive point weight added per warning at this level.
    pub points: i64,
    /// Whether the offending message should be removed.
    pub delete_message: bool,
    pub description: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A specific described offense belonging to a warning level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub level_id: i64,
    pub name: String,
    pub description: String,
    /// Presentation order within the level.
    pub sort_order: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A ledger entry: immutable fact plus a mutable review sub-record.
///
/// `points` is a snapshot of the level's weight at creation time and is
/// never recomputed if the level is later edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub id: i64,
    pub user_id: String,
    pub level_id: i64,
    pub points: i64,
    /// Free-text description of the rule that was triggered.
    pub rule_text: String,
    pub message_content: String,
    pub message_context: String,
    pub message_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub ignored: bool,
    pub ignored_at: Option<DateTime<Utc>>,
    pub ignored_by: Option<String>,
    pub ignore_reason: Option<String>,
}

/// Kind of automatic punishment a policy rule triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentKind {
    /// Timed suspension.
    Mute,
    /// Permanent ban.
    Ban,
}

impl PunishmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Ban => "ban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mute" => Some(Self::Mute),
            "ban" => Some(Self::Ban),
            _ => None,
        }
    }
}

/// Policy entry mapping a cumulative point threshold to an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunishmentRule {
    pub id: i64,
    pub kind: PunishmentKind,
    pub point_threshold: i64,
    /// Required for mutes, absent for bans (permanent).
    pub duration_secs: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a punishment actually decided.
///
/// Not the source of truth for current status (that is the user row's
/// flags), but the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Punishment {
    pub id: String,
    pub user_id: String,
    pub kind: PunishmentKind,
    pub reason: String,
    pub duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A punishment decided by the scoring engine, before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentDecision {
    pub kind: PunishmentKind,
    pub point_threshold: i64,
    pub duration_secs: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Result of recording a warning against a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningOutcome {
    pub warning_id: i64,
    pub level_name: String,
    pub points_added: i64,
    pub new_total: i64,
    /// Whether the connector should delete the offending message.
    pub delete_message: bool,
    pub punishment: Option<PunishmentDecision>,
}

/// Result of handling one incoming message end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModerationOutcome {
    /// No violation detected (including classifier-unavailable degradation).
    Clean,
    /// A warning was recorded; the punishment side effect may have failed.
    Warned {
        outcome: WarningOutcome,
        execution_failed: bool,
    },
}

impl ModerationOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

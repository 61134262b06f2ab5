//! Punishment policy: point thresholds mapped to automatic actions.
//!
//! The selection walk is kept as a pure function so the escalation rules
//! can be tested with injected fixtures.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::database::{parse_ts, Database};
use crate::error::{MagistrateError, Result};
use crate::models::{PunishmentKind, PunishmentRule};

/// Fields accepted when creating a punishment rule.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPunishmentRule {
    pub kind: PunishmentKind,
    pub point_threshold: i64,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial update for a punishment rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PunishmentRulePatch {
    pub point_threshold: Option<i64>,
    pub duration_secs: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Select the applicable rule for a point total.
///
/// Active rules are ordered by threshold descending and the first rule
/// whose threshold is at or below the total wins; overlapping thresholds
/// resolve to the highest threshold, never to insertion order. Equal
/// thresholds resolve ban over mute, then lowest id.
pub fn applicable_rule(total: i64, rules: &[PunishmentRule]) -> Option<&PunishmentRule> {
    let mut active: Vec<&PunishmentRule> = rules.iter().filter(|r| r.is_active).collect();
    active.sort_by(|a, b| {
        b.point_threshold
            .cmp(&a.point_threshold)
            .then_with(|| rank(a.kind).cmp(&rank(b.kind)))
            .then_with(|| a.id.cmp(&b.id))
    });

    active.into_iter().find(|r| r.point_threshold <= total)
}

fn rank(kind: PunishmentKind) -> u8 {
    match kind {
        PunishmentKind::Ban => 0,
        PunishmentKind::Mute => 1,
    }
}

/// Select the applicable rule of one kind for a point total.
///
/// Used by the reversal paths, which evaluate mute and ban justification
/// independently.
pub fn applicable_rule_of_kind(
    total: i64,
    kind: PunishmentKind,
    rules: &[PunishmentRule],
) -> Option<&PunishmentRule> {
    let mut active: Vec<&PunishmentRule> = rules
        .iter()
        .filter(|r| r.is_active && r.kind == kind)
        .collect();
    active.sort_by(|a, b| b.point_threshold.cmp(&a.point_threshold));

    active.into_iter().find(|r| r.point_threshold <= total)
}

/// Punishment policy store.
pub struct PunishmentPolicy {
    db: Arc<Database>,
}

impl PunishmentPolicy {
    /// Create a new policy store.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a punishment rule.
    ///
    /// Mutes require a positive duration; bans are permanent and carry
    /// none.
    pub async fn create_rule(&self, new: NewPunishmentRule) -> Result<PunishmentRule> {
        validate_rule(new.kind, new.point_threshold, new.duration_secs)?;

        let result = sqlx::query(
            "INSERT INTO punishment_rules (kind, point_threshold, duration_secs, is_active, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new.kind.as_str())
        .bind(new.point_threshold)
        .bind(new.duration_secs)
        .bind(new.is_active as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to create punishment rule: {}", e)))?;

        self.get_rule(result.last_insert_rowid())
            .await?
            .ok_or_else(|| {
                MagistrateError::InternalState("punishment rule vanished after insert".to_string())
            })
    }

    /// Get a punishment rule by id.
    pub async fn get_rule(&self, id: i64) -> Result<Option<PunishmentRule>> {
        let row = sqlx::query(
            "SELECT id, kind, point_threshold, duration_secs, is_active, created_at
             FROM punishment_rules WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to get punishment rule: {}", e)))?;

        row.map(|r| punishment_rule_from_row(&r)).transpose()
    }

    /// List all punishment rules ordered by threshold.
    pub async fn list_rules(&self) -> Result<Vec<PunishmentRule>> {
        let rows = sqlx::query(
            "SELECT id, kind, point_threshold, duration_secs, is_active, created_at
             FROM punishment_rules ORDER BY point_threshold ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to list punishment rules: {}", e)))?;

        rows.iter().map(punishment_rule_from_row).collect()
    }

    /// Fetch the active rule set, the policy snapshot read at decision time.
    pub async fn active_rules(&self) -> Result<Vec<PunishmentRule>> {
        let rows = sqlx::query(
            "SELECT id, kind, point_threshold, duration_secs, is_active, created_at
             FROM punishment_rules WHERE is_active = 1 ORDER BY point_threshold DESC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to load active rules: {}", e)))?;

        rows.iter().map(punishment_rule_from_row).collect()
    }

    /// Update a punishment rule.
    pub async fn update_rule(&self, id: i64, patch: PunishmentRulePatch) -> Result<PunishmentRule> {
        let mut rule = self
            .get_rule(id)
            .await?
            .ok_or_else(|| MagistrateError::NotFound(format!("punishment rule {}", id)))?;

        if let Some(point_threshold) = patch.point_threshold {
            rule.point_threshold = point_threshold;
        }
        if let Some(duration_secs) = patch.duration_secs {
            rule.duration_secs = duration_secs;
        }
        if let Some(is_active) = patch.is_active {
            rule.is_active = is_active;
        }

        validate_rule(rule.kind, rule.point_threshold, rule.duration_secs)?;

        sqlx::query(
            "UPDATE punishment_rules SET point_threshold = ?, duration_secs = ?, is_active = ?
             WHERE id = ?",
        )
        .bind(rule.point_threshold)
        .bind(rule.duration_secs)
        .bind(rule.is_active as i64)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(|e| MagistrateError::Database(format!("Failed to update punishment rule: {}", e)))?;

        Ok(rule)
    }

    /// Delete a punishment rule.
    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM punishment_rules WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| {
                MagistrateError::Database(format!("Failed to delete punishment rule: {}", e))
            })?;

        if result.rows_affected() == 0 {
            return Err(MagistrateError::NotFound(format!("punishment rule {}", id)));
        }

        Ok(())
    }
}

fn validate_rule(kind: PunishmentKind, threshold: i64, duration_secs: Option<i64>) -> Result<()> {
    if threshold <= 0 {
        return Err(MagistrateError::Config(
            "point threshold must be a positive integer".to_string(),
        ));
    }

    match kind {
        PunishmentKind::Mute => match duration_secs {
            Some(d) if d > 0 => Ok(()),
            _ => Err(MagistrateError::Config(
                "mute rules require a positive duration".to_string(),
            )),
        },
        PunishmentKind::Ban => {
            if duration_secs.is_some() {
                Err(MagistrateError::Config(
                    "ban rules are permanent and carry no duration".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }
}

/// Map a `punishment_rules` row.
fn punishment_rule_from_row(row: &SqliteRow) -> Result<PunishmentRule> {
    let kind_str: String = row.get("kind");
    let kind = PunishmentKind::parse(&kind_str).ok_or_else(|| {
        MagistrateError::Database(format!("Invalid punishment kind: {}", kind_str))
    })?;

    Ok(PunishmentRule {
        id: row.get("id"),
        kind,
        point_threshold: row.get("point_threshold"),
        duration_secs: row.get("duration_secs"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: parse_ts(row.get("created_at"), "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::database::Database;
    use crate::error::MagistrateError;
    use crate::models::{PunishmentKind, PunishmentRule};
    use crate::policy::{
        applicable_rule, applicable_rule_of_kind, NewPunishmentRule, PunishmentPolicy,
        PunishmentRulePatch,
    };

    fn fixture(id: i64, kind: PunishmentKind, threshold: i64, active: bool) -> PunishmentRule {
        PunishmentRule {
            id,
            kind,
            point_threshold: threshold,
            duration_secs: match kind {
                PunishmentKind::Mute => Some(3600),
                PunishmentKind::Ban => None,
            },
            is_active: active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn highest_met_threshold_wins() {
        // Insertion order deliberately reversed: ban@10 listed after mute@5
        let rules = vec![
            fixture(1, PunishmentKind::Mute, 5, true),
            fixture(2, PunishmentKind::Ban, 10, true),
        ];

        let selected = applicable_rule(10, &rules).expect("should select");
        assert_eq!(selected.kind, PunishmentKind::Ban);
        assert_eq!(selected.point_threshold, 10);

        // And the other insertion order
        let rules = vec![
            fixture(2, PunishmentKind::Ban, 10, true),
            fixture(1, PunishmentKind::Mute, 5, true),
        ];
        let selected = applicable_rule(10, &rules).expect("should select");
        assert_eq!(selected.kind, PunishmentKind::Ban);
    }

    #[test]
    fn below_all_thresholds_selects_nothing() {
        let rules = vec![
            fixture(1, PunishmentKind::Mute, 5, true),
            fixture(2, PunishmentKind::Ban, 10, true),
        ];
        assert!(applicable_rule(4, &rules).is_none());
        assert!(applicable_rule(0, &rules).is_none());
    }

    #[test]
    fn between_thresholds_selects_lower() {
        let rules = vec![
            fixture(1, PunishmentKind::Mute, 5, true),
            fixture(2, PunishmentKind::Ban, 10, true),
        ];
        let selected = applicable_rule(8, &rules).expect("should select");
        assert_eq!(selected.kind, PunishmentKind::Mute);
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let rules = vec![
            fixture(1, PunishmentKind::Mute, 5, true),
            fixture(2, PunishmentKind::Ban, 10, false),
        ];
        let selected = applicable_rule(15, &rules).expect("should select");
        assert_eq!(selected.kind, PunishmentKind::Mute);
    }

    #[test]
    fn kind_scoped_selection_ignores_other_kind() {
        let rules = vec![
            fixture(1, PunishmentKind::Mute, 5, true),
            fixture(2, PunishmentKind::Ban, 10, true),
        ];

        assert!(applicable_rule_of_kind(8, PunishmentKind::Ban, &rules).is_none());
        assert!(applicable_rule_of_kind(8, PunishmentKind::Mute, &rules).is_some());
        assert!(applicable_rule_of_kind(12, PunishmentKind::Ban, &rules).is_some());
    }

    #[test]
    fn crud_round_trip() {
        tokio_test::block_on(async {
            let db = Arc::new(Database::in_memory().await.expect("should create db"));
            let policy = PunishmentPolicy::new(db);

            let created = policy
                .create_rule(NewPunishmentRule {
                    kind: PunishmentKind::Mute,
                    point_threshold: 5,
                    duration_secs: Some(3600),
                    is_active: true,
                })
                .await
                .expect("should create");
            assert_eq!(created.point_threshold, 5);

            let updated = policy
                .update_rule(
                    created.id,
                    PunishmentRulePatch {
                        point_threshold: Some(6),
                        ..Default::default()
                    },
                )
                .await
                .expect("should update");
            assert_eq!(updated.point_threshold, 6);

            policy.delete_rule(created.id).await.expect("should delete");
            assert!(policy
                .get_rule(created.id)
                .await
                .expect("should query")
                .is_none());
        });
    }

    #[tokio::test]
    async fn mute_without_duration_rejected() {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let policy = PunishmentPolicy::new(db);

        let err = policy
            .create_rule(NewPunishmentRule {
                kind: PunishmentKind::Mute,
                point_threshold: 5,
                duration_secs: None,
                is_active: true,
            })
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Config(_)));
    }

    #[tokio::test]
    async fn ban_with_duration_rejected() {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let policy = PunishmentPolicy::new(db);

        let err = policy
            .create_rule(NewPunishmentRule {
                kind: PunishmentKind::Ban,
                point_threshold: 10,
                duration_secs: Some(60),
                is_active: true,
            })
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Config(_)));
    }

    #[tokio::test]
    async fn active_rules_excludes_inactive() {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let policy = PunishmentPolicy::new(db);

        policy
            .create_rule(NewPunishmentRule {
                kind: PunishmentKind::Mute,
                point_threshold: 5,
                duration_secs: Some(3600),
                is_active: true,
            })
            .await
            .expect("should create");
        policy
            .create_rule(NewPunishmentRule {
                kind: PunishmentKind::Ban,
                point_threshold: 10,
                duration_secs: None,
                is_active: false,
            })
            .await
            .expect("should create");

        let active = policy.active_rules().await.expect("should list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, PunishmentKind::Mute);
    }
}

#[cfg(test)]
mod property_tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use crate::models::{PunishmentKind, PunishmentRule};
    use crate::policy::applicable_rule;

    fn arb_rule() -> impl Strategy<Value = PunishmentRule> {
        (
            1i64..1000i64,
            prop::bool::ANY,
            prop::bool::ANY,
            1i64..100000i64,
        )
            .prop_map(|(threshold, is_ban, is_active, duration)| PunishmentRule {
                id: 0,
                kind: if is_ban {
                    PunishmentKind::Ban
                } else {
                    PunishmentKind::Mute
                },
                point_threshold: threshold,
                duration_secs: if is_ban { None } else { Some(duration) },
                is_active,
                created_at: Utc::now(),
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The selected rule is always active, always met, and no other
        /// active met rule has a higher threshold.
        #[test]
        fn prop_selection_is_highest_met_active(
            total in 0i64..1200i64,
            rules in prop::collection::vec(arb_rule(), 0..10),
        ) {
            match applicable_rule(total, &rules) {
                Some(selected) => {
                    prop_assert!(selected.is_active);
                    prop_assert!(selected.point_threshold <= total);
                    for rule in &rules {
                        if rule.is_active && rule.point_threshold <= total {
                            prop_assert!(rule.point_threshold <= selected.point_threshold);
                        }
                    }
                }
                None => {
                    for rule in &rules {
                        prop_assert!(!rule.is_active || rule.point_threshold > total);
                    }
                }
            }
        }

        /// Selection never depends on insertion order.
        #[test]
        fn prop_selection_order_independent(
            total in 0i64..1200i64,
            mut rules in prop::collection::vec(arb_rule(), 0..10),
        ) {
            let forward = applicable_rule(total, &rules).map(|r| (r.point_threshold, r.kind));
            rules.reverse();
            let backward = applicable_rule(total, &rules).map(|r| (r.point_threshold, r.kind));
            prop_assert_eq!(forward, backward);
        }
    }
}

//! Moderation pipeline orchestration.
//!
//! Composes the context tracker, verdict cache, classifier, scoring
//! engine, and punishment executor into the message-handling path exposed
//! to the chat connector.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::VerdictCache;
use crate::catalog::RuleCatalog;
use crate::classifier::{ClassifierVerdict, ClassifyOutcome, GeminiClassifier};
use crate::context::{ContextMessage, ContextTracker};
use crate::error::{MagistrateError, Result};
use crate::executor::PunishmentExecutor;
use crate::models::{ModerationOutcome, PunishmentDecision, PunishmentKind};
use crate::prompt::PromptStore;
use crate::scoring::{RecordWarning, ScoringEngine};

/// An incoming chat message to moderate.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub user_id: String,
    pub username: String,
    pub channel_id: u64,
    pub content: String,
}

/// The moderation pipeline.
pub struct ModerationPipeline {
    catalog: Arc<RuleCatalog>,
    prompts: Arc<PromptStore>,
    classifier: Option<Arc<GeminiClassifier>>,
    engine: Arc<ScoringEngine>,
    executor: Arc<dyn PunishmentExecutor>,
    context: Arc<ContextTracker>,
    verdict_cache: Arc<VerdictCache>,
}

impl ModerationPipeline {
    /// Create a new pipeline.
    pub fn new(
        catalog: Arc<RuleCatalog>,
        prompts: Arc<PromptStore>,
        classifier: Option<Arc<GeminiClassifier>>,
        engine: Arc<ScoringEngine>,
        executor: Arc<dyn PunishmentExecutor>,
    ) -> Self {
        Self {
            catalog,
            prompts,
            classifier,
            engine,
            executor,
            context: Arc::new(ContextTracker::new()),
            verdict_cache: Arc::new(VerdictCache::new()),
        }
    }

    /// Replace the context tracker (custom window depth).
    pub fn with_context_tracker(mut self, context: Arc<ContextTracker>) -> Self {
        self.context = context;
        self
    }

    /// Replace the verdict cache.
    pub fn with_verdict_cache(mut self, cache: Arc<VerdictCache>) -> Self {
        self.verdict_cache = cache;
        self
    }

    /// Get the verdict cache (for monitoring).
    pub fn verdict_cache(&self) -> &Arc<VerdictCache> {
        &self.verdict_cache
    }

    /// Get the punishment executor.
    pub fn executor(&self) -> &Arc<dyn PunishmentExecutor> {
        &self.executor
    }

    /// Handle one incoming message end to end.
    ///
    /// Classifier failures and configuration anomalies degrade to a clean
    /// outcome; they are logged for moderators but never surfaced to the
    /// chat user and never block ingestion.
    pub async fn handle_message(&self, message: IncomingMessage) -> Result<ModerationOutcome> {
        // Snapshot the preceding conversation before this message joins it
        let context_block = self.context.format_for_prompt(message.channel_id);
        self.context.add_message(
            message.channel_id,
            ContextMessage {
                author_id: message.user_id.clone(),
                author_name: message.username.clone(),
                content: message.content.clone(),
                timestamp: Utc::now(),
            },
        );

        let verdict = match self.obtain_verdict(&message, &context_block).await {
            Some(verdict) => verdict,
            None => return Ok(ModerationOutcome::Clean),
        };

        if !verdict.violation_detected {
            return Ok(ModerationOutcome::Clean);
        }

        let Some(level_name) = verdict.level_name.as_deref() else {
            tracing::warn!(
                user_id = %message.user_id,
                "Classifier flagged a violation without a level name; treating as clean"
            );
            return Ok(ModerationOutcome::Clean);
        };

        let rule_text = verdict
            .rule
            .clone()
            .unwrap_or_else(|| verdict.explanation.clone());

        let outcome = match self
            .engine
            .record_warning(RecordWarning {
                user_id: message.user_id.clone(),
                username: message.username.clone(),
                level_name: level_name.to_string(),
                rule_text,
                message_content: message.content.clone(),
                message_context: context_block,
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(MagistrateError::Config(msg)) => {
                // Classifier and catalog are out of sync; a configuration
                // anomaly for moderators, not a violation for the user.
                tracing::warn!(
                    user_id = %message.user_id,
                    level = %level_name,
                    error = %msg,
                    "Verdict level does not match any configured warning level"
                );
                return Ok(ModerationOutcome::Clean);
            }
            Err(e) => return Err(e),
        };

        // Execution comes after the ledger commit and never rolls it back
        let execution_failed = match &outcome.punishment {
            Some(decision) => !self
                .execute_decision(&message.user_id, decision)
                .await,
            None => false,
        };

        Ok(ModerationOutcome::Warned {
            outcome,
            execution_failed,
        })
    }

    /// Look up a cached verdict or ask the classifier, returning `None`
    /// when no verdict can be obtained (treated as clean).
    async fn obtain_verdict(
        &self,
        message: &IncomingMessage,
        context_block: &str,
    ) -> Option<ClassifierVerdict> {
        if let Some(cached) = self.verdict_cache.get(&message.content).await {
            tracing::debug!(user_id = %message.user_id, "Verdict cache hit");
            return Some(cached);
        }

        let classifier = self.classifier.as_ref()?;

        let system_prompt = match self.build_system_prompt().await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build classifier prompt; skipping message");
                return None;
            }
        };

        let user_prompt = if context_block.is_empty() {
            format!(
                "## Message to Analyze\n{}: {}",
                message.username, message.content
            )
        } else {
            format!(
                "{}\n\n## Message to Analyze\n{}: {}",
                context_block, message.username, message.content
            )
        };

        match classifier
            .classify_with_retry(&system_prompt, &user_prompt)
            .await
        {
            ClassifyOutcome::Verdict(verdict) => {
                self.verdict_cache
                    .insert(&message.content, verdict.clone())
                    .await;
                Some(verdict)
            }
            ClassifyOutcome::Unavailable { attempts } => {
                // Availability over false positives: the message passes
                tracing::warn!(
                    user_id = %message.user_id,
                    attempts = attempts,
                    "Classifier unavailable; message passes unflagged"
                );
                None
            }
        }
    }

    async fn build_system_prompt(&self) -> Result<String> {
        let base = self.prompts.active_body().await?;
        let catalog = self.catalog.render_for_prompt().await?;
        Ok(format!("{}\n\n{}", base, catalog))
    }

    /// Apply a decided punishment, best-effort. Returns false on failure.
    async fn execute_decision(&self, user_id: &str, decision: &PunishmentDecision) -> bool {
        let result = match decision.kind {
            PunishmentKind::Mute => {
                self.executor
                    .mute(
                        user_id,
                        decision.duration_secs.unwrap_or(0),
                        &decision.reason,
                    )
                    .await
            }
            PunishmentKind::Ban => self.executor.ban(user_id, &decision.reason).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    kind = ?decision.kind,
                    error = %e,
                    "Punishment execution failed; ledger remains authoritative"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cache::VerdictCache;
    use crate::catalog::{NewLevel, RuleCatalog};
    use crate::classifier::ClassifierVerdict;
    use crate::database::Database;
    use crate::executor::testing::{ExecutedAction, RecordingExecutor};
    use crate::models::{ModerationOutcome, PunishmentKind};
    use crate::pipeline::{IncomingMessage, ModerationPipeline};
    use crate::policy::{NewPunishmentRule, PunishmentPolicy};
    use crate::prompt::PromptStore;
    use crate::scoring::ScoringEngine;

    struct Harness {
        db: Arc<Database>,
        engine: Arc<ScoringEngine>,
        pipeline: ModerationPipeline,
        executor: Arc<RecordingExecutor>,
        cache: Arc<VerdictCache>,
    }

    /// Pipeline without a live classifier: verdicts are seeded through the
    /// cache, which the pipeline consults first.
    async fn harness(executor: RecordingExecutor) -> Harness {
        let db = Arc::new(Database::in_memory().await.expect("should create db"));
        let catalog = Arc::new(RuleCatalog::new(db.clone()));
        let policy = Arc::new(PunishmentPolicy::new(db.clone()));
        let prompts = Arc::new(PromptStore::new(db.clone()));
        let engine = Arc::new(ScoringEngine::new(
            db.clone(),
            catalog.clone(),
            policy.clone(),
        ));

        for (name, points) in [("yellow", 1), ("red", 5)] {
            catalog
                .create_level(NewLevel {
                    name: name.to_string(),
                    color: "#ffffff".to_string(),
                    points,
                    delete_message: name == "red",
                    description: String::new(),
                    enabled: true,
                })
                .await
                .expect("should create level");
        }
        policy
            .create_rule(NewPunishmentRule {
                kind: PunishmentKind::Mute,
                point_threshold: 5,
                duration_secs: Some(3600),
                is_active: true,
            })
            .await
            .expect("should create rule");

        let executor = Arc::new(executor);
        let cache = Arc::new(VerdictCache::new());
        let pipeline = ModerationPipeline::new(
            catalog,
            prompts,
            None,
            engine.clone(),
            executor.clone() as Arc<dyn crate::executor::PunishmentExecutor>,
        )
        .with_verdict_cache(cache.clone());

        Harness {
            db,
            engine,
            pipeline,
            executor,
            cache,
        }
    }

    fn message(user: &str, content: &str) -> IncomingMessage {
        IncomingMessage {
            user_id: user.to_string(),
            username: format!("{}-name", user),
            channel_id: 42,
            content: content.to_string(),
        }
    }

    fn violation(level: &str) -> ClassifierVerdict {
        ClassifierVerdict {
            violation_detected: true,
            level_name: Some(level.to_string()),
            explanation: "hostile message".to_string(),
            rule: Some("No personal attacks".to_string()),
        }
    }

    #[tokio::test]
    async fn clean_when_no_classifier_and_no_cached_verdict() {
        let h = harness(RecordingExecutor::new()).await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "hello world"))
            .await
            .expect("should handle");

        assert!(outcome.is_clean());
        assert!(h.db.get_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_violation_records_warning() {
        let h = harness(RecordingExecutor::new()).await;
        h.cache.insert("you are awful", violation("yellow")).await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "you are awful"))
            .await
            .expect("should handle");

        let ModerationOutcome::Warned {
            outcome,
            execution_failed,
        } = outcome
        else {
            panic!("expected a warning");
        };

        assert_eq!(outcome.level_name, "yellow");
        assert_eq!(outcome.points_added, 1);
        assert_eq!(outcome.new_total, 1);
        assert!(!outcome.delete_message);
        assert!(outcome.punishment.is_none());
        assert!(!execution_failed);

        let warning = h
            .engine
            .get_warning(outcome.warning_id)
            .await
            .expect("should query")
            .expect("warning should exist");
        assert_eq!(warning.rule_text, "No personal attacks");
    }

    #[tokio::test]
    async fn punishment_is_executed() {
        let h = harness(RecordingExecutor::new()).await;
        h.cache.insert("threat", violation("red")).await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "threat"))
            .await
            .expect("should handle");

        let ModerationOutcome::Warned {
            outcome,
            execution_failed,
        } = outcome
        else {
            panic!("expected a warning");
        };

        assert!(outcome.delete_message);
        assert_eq!(
            outcome.punishment.expect("should mute").kind,
            PunishmentKind::Mute
        );
        assert!(!execution_failed);

        assert_eq!(
            h.executor.recorded(),
            vec![ExecutedAction::Mute {
                user_id: "u1".to_string(),
                duration_secs: 3600,
            }]
        );
    }

    #[tokio::test]
    async fn execution_failure_keeps_ledger() {
        let h = harness(RecordingExecutor::failing()).await;
        h.cache.insert("threat", violation("red")).await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "threat"))
            .await
            .expect("should handle");

        let ModerationOutcome::Warned {
            execution_failed, ..
        } = outcome
        else {
            panic!("expected a warning");
        };
        assert!(execution_failed);

        // The ledger write survived the failed side effect
        let user = h
            .db
            .get_user("u1")
            .await
            .expect("should query")
            .expect("should exist");
        assert_eq!(user.total_points, 5);
        assert!(user.is_muted);
    }

    #[tokio::test]
    async fn unknown_level_verdict_degrades_to_clean() {
        let h = harness(RecordingExecutor::new()).await;
        h.cache.insert("weird", violation("ultraviolet")).await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "weird"))
            .await
            .expect("should handle");

        assert!(outcome.is_clean());
        assert!(h.db.get_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verdict_without_level_degrades_to_clean() {
        let h = harness(RecordingExecutor::new()).await;
        h.cache
            .insert(
                "odd",
                ClassifierVerdict {
                    violation_detected: true,
                    level_name: None,
                    explanation: "flagged without a level".to_string(),
                    rule: None,
                },
            )
            .await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "odd"))
            .await
            .expect("should handle");

        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn clean_verdict_passes_through() {
        let h = harness(RecordingExecutor::new()).await;
        h.cache
            .insert("benign", ClassifierVerdict::clean())
            .await;

        let outcome = h
            .pipeline
            .handle_message(message("u1", "benign"))
            .await
            .expect("should handle");

        assert!(outcome.is_clean());
        assert!(h.executor.recorded().is_empty());
    }

    #[tokio::test]
    async fn context_accumulates_across_messages() {
        let h = harness(RecordingExecutor::new()).await;

        for text in ["first", "second", "third"] {
            h.pipeline
                .handle_message(message("u1", text))
                .await
                .expect("should handle");
        }

        // Warning context contains the preceding messages, not the new one
        h.cache.insert("fourth", violation("yellow")).await;
        let outcome = h
            .pipeline
            .handle_message(message("u1", "fourth"))
            .await
            .expect("should handle");

        let ModerationOutcome::Warned { outcome, .. } = outcome else {
            panic!("expected a warning");
        };
        let warning = h
            .engine
            .get_warning(outcome.warning_id)
            .await
            .expect("should query")
            .expect("warning should exist");
        assert!(warning.message_context.contains("first"));
        assert!(warning.message_context.contains("third"));
        assert!(!warning.message_context.contains("fourth"));
    }
}

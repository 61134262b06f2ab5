//! Discord gateway connector.
//!
//! Feeds incoming messages into the moderation pipeline, deletes flagged
//! messages when the warning level says so, and posts the channel notice.
//! Classifier and punishment errors are never surfaced to chat users.

use std::sync::Arc;

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;

use crate::models::{ModerationOutcome, PunishmentKind, WarningOutcome};
use crate::pipeline::{IncomingMessage, ModerationPipeline};

/// Gateway event handler.
pub struct GatewayHandler {
    pipeline: Arc<ModerationPipeline>,
}

impl GatewayHandler {
    /// Create a new handler around the pipeline.
    pub fn new(pipeline: Arc<ModerationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        // Ignore bot messages
        if msg.author.bot {
            return;
        }

        let incoming = IncomingMessage {
            user_id: msg.author.id.to_string(),
            username: msg.author.name.clone(),
            channel_id: msg.channel_id.get(),
            content: msg.content.clone(),
        };

        let outcome = match self.pipeline.handle_message(incoming).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, message_id = %msg.id, "Failed to process message");
                return;
            }
        };

        let ModerationOutcome::Warned {
            outcome,
            execution_failed,
        } = outcome
        else {
            return;
        };

        if execution_failed {
            tracing::warn!(
                user_id = %msg.author.id,
                "Punishment execution failed; warning stands, moderators should retry"
            );
        }

        // The connector owns message deletion, per the level's flag
        if outcome.delete_message {
            if let Err(e) = msg.delete(&ctx.http).await {
                tracing::error!(error = %e, message_id = %msg.id, "Failed to delete message");
            }
        }

        let notice = build_notice(msg.author.id.get(), &outcome);
        if let Err(e) = msg.channel_id.say(&ctx.http, notice).await {
            tracing::error!(error = %e, channel_id = %msg.channel_id, "Failed to post notice");
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "Magistrate connected to gateway");
    }
}

/// Build the channel notice for a recorded warning.
fn build_notice(author_id: u64, outcome: &WarningOutcome) -> String {
    let mut notice = format!(
        "⚠️ <@{}> received a **{}** warning (+{} points, total {}).",
        author_id, outcome.level_name, outcome.points_added, outcome.new_total
    );

    if let Some(punishment) = &outcome.punishment {
        match punishment.kind {
            PunishmentKind::Mute => {
                let minutes = punishment.duration_secs.unwrap_or(0) / 60;
                notice.push_str(&format!(
                    "\n🔇 Suspended for {} minutes ({} point threshold).",
                    minutes, punishment.point_threshold
                ));
            }
            PunishmentKind::Ban => {
                notice.push_str(&format!(
                    "\n🔨 Banned ({} point threshold).",
                    punishment.point_threshold
                ));
            }
        }
    }

    notice
}

#[cfg(test)]
mod tests {
    use crate::connector::build_notice;
    use crate::models::{PunishmentDecision, PunishmentKind, WarningOutcome};

    fn outcome(punishment: Option<PunishmentDecision>) -> WarningOutcome {
        WarningOutcome {
            warning_id: 1,
            level_name: "orange".to_string(),
            points_added: 3,
            new_total: 8,
            delete_message: false,
            punishment,
        }
    }

    #[test]
    fn notice_without_punishment() {
        let notice = build_notice(42, &outcome(None));

        assert!(notice.contains("<@42>"));
        assert!(notice.contains("**orange**"));
        assert!(notice.contains("+3 points"));
        assert!(notice.contains("total 8"));
        assert!(!notice.contains("Suspended"));
        assert!(!notice.contains("Banned"));
    }

    #[test]
    fn notice_with_mute() {
        let notice = build_notice(
            42,
            &outcome(Some(PunishmentDecision {
                kind: PunishmentKind::Mute,
                point_threshold: 5,
                duration_secs: Some(3600),
                expires_at: None,
                reason: "test".to_string(),
            })),
        );

        assert!(notice.contains("Suspended for 60 minutes"));
        assert!(notice.contains("5 point threshold"));
    }

    #[test]
    fn notice_with_ban() {
        let notice = build_notice(
            42,
            &outcome(Some(PunishmentDecision {
                kind: PunishmentKind::Ban,
                point_threshold: 10,
                duration_secs: None,
                expires_at: None,
                reason: "test".to_string(),
            })),
        );

        assert!(notice.contains("Banned"));
        assert!(notice.contains("10 point threshold"));
    }
}

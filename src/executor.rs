//! Punishment execution against the chat platform.
//!
//! The engine decides punishments; executors perform them. Execution is
//! best-effort: a failed platform call is logged and reported, but the
//! ledger write it followed is never rolled back.

use std::sync::Arc;

use chrono::Utc;
use serenity::async_trait;
use serenity::builder::EditMember;
use serenity::http::Http;
use serenity::model::id::{GuildId, UserId};
use serenity::model::Timestamp;

use crate::error::{MagistrateError, Result};

/// Boundary to the platform's moderation actions.
#[async_trait]
pub trait PunishmentExecutor: Send + Sync {
    /// Suspend a user's ability to communicate for a duration.
    async fn mute(&self, user_id: &str, duration_secs: i64, reason: &str) -> Result<()>;

    /// Permanently ban a user.
    async fn ban(&self, user_id: &str, reason: &str) -> Result<()>;

    /// Lift a suspension before its natural expiry.
    async fn unmute(&self, user_id: &str, reason: &str) -> Result<()>;

    /// Lift a ban.
    async fn unban(&self, user_id: &str, reason: &str) -> Result<()>;
}

/// Discord-backed executor using timeouts for mutes.
pub struct DiscordExecutor {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordExecutor {
    /// Create a new executor bound to one guild.
    pub fn new(http: Arc<Http>, guild_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId::new(guild_id),
        }
    }

    fn parse_user(&self, user_id: &str) -> Result<UserId> {
        user_id
            .parse::<u64>()
            .map(UserId::new)
            .map_err(|_| MagistrateError::Config(format!("invalid platform user id '{}'", user_id)))
    }
}

#[async_trait]
impl PunishmentExecutor for DiscordExecutor {
    async fn mute(&self, user_id: &str, duration_secs: i64, reason: &str) -> Result<()> {
        let user_id = self.parse_user(user_id)?;

        let timeout_until = Timestamp::from_unix_timestamp(Utc::now().timestamp() + duration_secs)
            .map_err(|e| MagistrateError::InternalState(format!("Invalid timestamp: {}", e)))?;

        let edit_member = EditMember::new()
            .disable_communication_until(timeout_until.to_string())
            .audit_log_reason(reason);

        self.http
            .edit_member(self.guild_id, user_id, &edit_member, Some(reason))
            .await
            .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

        tracing::info!(
            guild_id = %self.guild_id,
            user_id = %user_id,
            duration_secs = duration_secs,
            "User timed out"
        );

        Ok(())
    }

    async fn ban(&self, user_id: &str, reason: &str) -> Result<()> {
        let user_id = self.parse_user(user_id)?;

        self.http
            .ban_user(self.guild_id, user_id, 0, Some(reason))
            .await
            .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

        tracing::info!(
            guild_id = %self.guild_id,
            user_id = %user_id,
            "User banned"
        );

        Ok(())
    }

    async fn unmute(&self, user_id: &str, reason: &str) -> Result<()> {
        let user_id = self.parse_user(user_id)?;

        let edit_member = EditMember::new()
            .enable_communication()
            .audit_log_reason(reason);

        self.http
            .edit_member(self.guild_id, user_id, &edit_member, Some(reason))
            .await
            .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

        tracing::info!(
            guild_id = %self.guild_id,
            user_id = %user_id,
            "User timeout lifted"
        );

        Ok(())
    }

    async fn unban(&self, user_id: &str, reason: &str) -> Result<()> {
        let user_id = self.parse_user(user_id)?;

        self.http
            .remove_ban(self.guild_id, user_id, Some(reason))
            .await
            .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

        tracing::info!(
            guild_id = %self.guild_id,
            user_id = %user_id,
            "User unbanned"
        );

        Ok(())
    }
}

/// Executor that only logs, for deployments without a gateway connection
/// (admin API maintenance, local development).
pub struct NoopExecutor;

#[async_trait]
impl PunishmentExecutor for NoopExecutor {
    async fn mute(&self, user_id: &str, duration_secs: i64, reason: &str) -> Result<()> {
        tracing::info!(user_id = %user_id, duration_secs, reason = %reason, "Mute skipped (no executor)");
        Ok(())
    }

    async fn ban(&self, user_id: &str, reason: &str) -> Result<()> {
        tracing::info!(user_id = %user_id, reason = %reason, "Ban skipped (no executor)");
        Ok(())
    }

    async fn unmute(&self, user_id: &str, reason: &str) -> Result<()> {
        tracing::info!(user_id = %user_id, reason = %reason, "Unmute skipped (no executor)");
        Ok(())
    }

    async fn unban(&self, user_id: &str, reason: &str) -> Result<()> {
        tracing::info!(user_id = %user_id, reason = %reason, "Unban skipped (no executor)");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serenity::http::Http;

    use crate::error::MagistrateError;
    use crate::executor::{DiscordExecutor, PunishmentExecutor};

    #[tokio::test]
    async fn invalid_user_id_is_config_error() {
        let executor = DiscordExecutor::new(Arc::new(Http::new("test-token")), 1);

        let err = executor
            .mute("not-a-number", 600, "test")
            .await
            .expect_err("should reject");
        assert!(matches!(err, MagistrateError::Config(_)));
    }
}

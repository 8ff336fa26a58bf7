// Serenity implementations of the auto-moderation platform ports.
//
// Translates the engine's abstract actions into Discord HTTP calls and maps
// serenity errors onto `SinkError` so the engine can tell "already gone" and
// "missing permission" apart from transient failures.

use crate::core::moderation::{
    InviteResolver, InviteTarget, ModerationActionSink, ModerationLogEntry, SinkError,
};
use crate::discord::moderation::formatter::format_log_entry;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Acts through the bot's HTTP client.
#[derive(Clone)]
pub struct SerenityActionSink {
    http: Arc<serenity::Http>,
}

impl SerenityActionSink {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

/// Classify a serenity error by its HTTP status.
fn classify(error: ::serenity::Error) -> SinkError {
    if let ::serenity::Error::Http(::serenity::http::HttpError::UnsuccessfulRequest(response)) =
        &error
    {
        let detail = response.error.message.clone();
        return match response.status_code.as_u16() {
            403 => SinkError::PermissionDenied(detail),
            404 => SinkError::NotFound(detail),
            _ => SinkError::Transient(detail),
        };
    }
    SinkError::Transient(error.to_string())
}

#[async_trait]
impl ModerationActionSink for SerenityActionSink {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), SinkError> {
        serenity::ChannelId::new(channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message_id))
            .await
            .map_err(classify)
    }

    async fn mute_user(
        &self,
        guild_id: u64,
        user_id: u64,
        duration_secs: u64,
        reason: &str,
    ) -> Result<(), SinkError> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + duration_secs as i64,
        )
        .map_err(|e| SinkError::Transient(format!("invalid timeout timestamp: {}", e)))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn kick_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), SinkError> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(&self.http, serenity::UserId::new(user_id), reason)
            .await
            .map_err(classify)
    }

    async fn ban_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), SinkError> {
        // Also removes the last day of their messages
        serenity::GuildId::new(guild_id)
            .ban_with_reason(&self.http, serenity::UserId::new(user_id), 1, reason)
            .await
            .map_err(classify)
    }

    async fn notify_user_dm(&self, user_id: u64, text: &str) -> Result<(), SinkError> {
        serenity::UserId::new(user_id)
            .direct_message(&self.http, serenity::CreateMessage::new().content(text))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn post_channel_notice(
        &self,
        channel_id: u64,
        text: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SinkError> {
        let notice = serenity::ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map_err(classify)?;

        if let Some(ttl) = ttl {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Err(e) = notice.delete(&http).await {
                    tracing::debug!("Failed to remove auto-moderation notice: {}", e);
                }
            });
        }
        Ok(())
    }

    async fn post_log_embed(
        &self,
        log_channel_id: u64,
        entry: &ModerationLogEntry,
    ) -> Result<(), SinkError> {
        serenity::ChannelId::new(log_channel_id)
            .send_message(
                &self.http,
                serenity::CreateMessage::new().embed(format_log_entry(entry)),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[async_trait]
impl InviteResolver for SerenityActionSink {
    async fn resolve_invite(&self, code: &str) -> Result<Option<InviteTarget>, SinkError> {
        match serenity::Invite::get(&self.http, code, false, false, None).await {
            Ok(invite) => Ok(Some(InviteTarget {
                guild_id: invite.guild.as_ref().map(|g| g.id.get()),
                guild_features: invite
                    .guild
                    .map(|g| g.features)
                    .unwrap_or_default(),
            })),
            Err(e) => match classify(e) {
                SinkError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }
}

// Discord message source for auto-moderation.
//
// Turns a gateway message into a `MessageRecord` and hands it to the service,
// acting through the serenity sink.

use crate::core::moderation::{EvaluationOutcome, Mentions, MessageRecord};
use crate::discord::moderation::action_sink::SerenityActionSink;
use crate::discord::Data;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

/// Run auto-moderation over a new message. Bot and DM messages are skipped.
pub async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Option<EvaluationOutcome> {
    if msg.author.bot {
        return None;
    }
    let guild_id = msg.guild_id?;

    let record = to_record(ctx, msg, guild_id);
    let sink = SerenityActionSink::new(ctx.http.clone());
    let outcome = data.automod.process_message(&record, &sink, &sink).await;

    if !outcome.sink_errors.is_empty() {
        tracing::warn!(
            guild_id = record.guild_id,
            user_id = record.user_id,
            failures = outcome.sink_errors.len(),
            "Auto-moderation acted with failures"
        );
    }
    Some(outcome)
}

fn to_record(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    guild_id: serenity::GuildId,
) -> MessageRecord {
    let created = msg.author.id.created_at();

    MessageRecord {
        message_id: msg.id.get(),
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        user_id: msg.author.id.get(),
        permissions: author_permissions(ctx, msg, guild_id).bits(),
        account_created_at: DateTime::<Utc>::from_timestamp(created.unix_timestamp(), 0)
            .unwrap_or_default(),
        content: msg.content.clone(),
        mentions: Mentions {
            user_ids: msg.mentions.iter().map(|u| u.id.get()).collect(),
            role_ids: msg.mention_roles.iter().map(|r| r.get()).collect(),
        },
    }
}

/// The author's permissions in the message's channel, from the cache.
/// Threads inherit from their parent channel. A cache miss yields no
/// permissions, so the author is treated as a regular member.
fn author_permissions(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    guild_id: serenity::GuildId,
) -> serenity::Permissions {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        tracing::debug!(guild_id = guild_id.get(), "Guild not cached, assuming no permissions");
        return serenity::Permissions::empty();
    };

    let channel = guild.channels.get(&msg.channel_id).or_else(|| {
        guild
            .threads
            .iter()
            .find(|t| t.id == msg.channel_id)
            .and_then(|t| t.parent_id)
            .and_then(|parent| guild.channels.get(&parent))
    });
    let Some(channel) = channel else {
        return serenity::Permissions::empty();
    };

    if let Some(member) = guild.members.get(&msg.author.id) {
        guild.user_permissions_in(channel, member)
    } else if let Some(partial) = msg.member.as_deref() {
        guild.partial_member_permissions_in(channel, msg.author.id, partial)
    } else {
        serenity::Permissions::empty()
    }
}

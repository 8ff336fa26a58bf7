use crate::core::moderation::{AppliedAction, ModerationLogEntry};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

/// Build the log-channel embed for one auto-moderation action.
pub fn format_log_entry(entry: &ModerationLogEntry) -> CreateEmbed {
    let timestamp = serenity::Timestamp::from_unix_timestamp(entry.timestamp.timestamp())
        .unwrap_or_else(|_| serenity::Timestamp::now());

    let content = if entry.content.is_empty() {
        "*No text content*".to_string()
    } else {
        format!("```{}```", entry.content.replace("```", "'''"))
    };

    let mut embed = CreateEmbed::default()
        .title(format!("🛡️ Auto-Mod: {}", entry.filter.label()))
        .description(format!(
            "Message by <@{}> in <#{}>",
            entry.user_id, entry.channel_id
        ))
        .color(action_color(&entry.action))
        .field("Reason", entry.reason.clone(), false)
        .field("Action", entry.action.label(), true)
        .field("Rule", entry.filter.as_str(), true)
        .field("Content", content, false)
        .footer(CreateEmbedFooter::new(format!(
            "User ID: {} • Guild ID: {}",
            entry.user_id, entry.guild_id
        )))
        .timestamp(timestamp);

    if let Some(evidence) = &entry.evidence {
        embed = embed.field("Matched", format!("`{}`", evidence), false);
    }
    embed
}

fn action_color(action: &AppliedAction) -> serenity::Color {
    match action {
        AppliedAction::None | AppliedAction::Monitored => serenity::Color::BLUE,
        AppliedAction::Deleted | AppliedAction::Warned { .. } => {
            serenity::Color::from_rgb(255, 165, 0) // Orange
        }
        AppliedAction::Muted { .. } => serenity::Color::GOLD,
        AppliedAction::Kicked | AppliedAction::Banned => serenity::Color::RED,
    }
}

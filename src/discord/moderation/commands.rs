// Auto-moderation slash commands for configuration.

use crate::core::moderation::{
    ActionKind, AutoModSettings, FilterType, NewAccountPolicy, SettingsError,
};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Rules shown by `/automod status`, in evaluation order.
const RULES: [FilterType; 13] = [
    FilterType::Phishing,
    FilterType::TokenGrabber,
    FilterType::IpGrabber,
    FilterType::Scam,
    FilterType::Profanity,
    FilterType::Links,
    FilterType::Invite,
    FilterType::Spam,
    FilterType::RepeatedText,
    FilterType::Caps,
    FilterType::MentionSpam,
    FilterType::Zalgo,
    FilterType::EmojiSpam,
];

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum RuleChoice {
    #[name = "Phishing links"]
    Phishing,
    #[name = "Token grabbers"]
    TokenGrabber,
    #[name = "IP grabbers"]
    IpGrabber,
    #[name = "Scams"]
    Scam,
    #[name = "Filtered words"]
    Profanity,
    #[name = "Links"]
    Links,
    #[name = "Invites"]
    Invite,
    #[name = "Message spam"]
    Spam,
    #[name = "Repeated text"]
    RepeatedText,
    #[name = "Caps"]
    Caps,
    #[name = "Mention spam"]
    MentionSpam,
    #[name = "Zalgo text"]
    Zalgo,
    #[name = "Emoji spam"]
    EmojiSpam,
}

impl From<RuleChoice> for FilterType {
    fn from(choice: RuleChoice) -> Self {
        match choice {
            RuleChoice::Phishing => FilterType::Phishing,
            RuleChoice::TokenGrabber => FilterType::TokenGrabber,
            RuleChoice::IpGrabber => FilterType::IpGrabber,
            RuleChoice::Scam => FilterType::Scam,
            RuleChoice::Profanity => FilterType::Profanity,
            RuleChoice::Links => FilterType::Links,
            RuleChoice::Invite => FilterType::Invite,
            RuleChoice::Spam => FilterType::Spam,
            RuleChoice::RepeatedText => FilterType::RepeatedText,
            RuleChoice::Caps => FilterType::Caps,
            RuleChoice::MentionSpam => FilterType::MentionSpam,
            RuleChoice::Zalgo => FilterType::Zalgo,
            RuleChoice::EmojiSpam => FilterType::EmojiSpam,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ActionChoice {
    #[name = "None (match only)"]
    MatchOnly,
    #[name = "Warn"]
    Warn,
    #[name = "Delete"]
    Delete,
    #[name = "Mute"]
    Mute,
    #[name = "Kick"]
    Kick,
    #[name = "Ban"]
    Ban,
}

impl From<ActionChoice> for ActionKind {
    fn from(choice: ActionChoice) -> Self {
        match choice {
            ActionChoice::MatchOnly => ActionKind::None,
            ActionChoice::Warn => ActionKind::Warn,
            ActionChoice::Delete => ActionKind::Delete,
            ActionChoice::Mute => ActionKind::Mute,
            ActionChoice::Kick => ActionKind::Kick,
            ActionChoice::Ban => ActionKind::Ban,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum PolicyChoice {
    #[name = "Monitor (log only)"]
    Monitor,
    #[name = "Restrict (timeout)"]
    Restrict,
    #[name = "Kick"]
    Kick,
}

impl From<PolicyChoice> for NewAccountPolicy {
    fn from(choice: PolicyChoice) -> Self {
        match choice {
            PolicyChoice::Monitor => NewAccountPolicy::Monitor,
            PolicyChoice::Restrict => NewAccountPolicy::Restrict,
            PolicyChoice::Kick => NewAccountPolicy::Kick,
        }
    }
}

/// Apply a change to this guild's settings. Validation failures are reported
/// to the caller and yield `None`.
async fn update<F>(ctx: Context<'_>, change: F) -> Result<Option<AutoModSettings>, Error>
where
    F: FnOnce(&mut AutoModSettings) + Send,
{
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();

    match ctx.data().automod.update_settings(guild_id, change).await {
        Ok(settings) => Ok(Some(settings)),
        Err(SettingsError::Invalid(reason)) => {
            ctx.say(format!("❌ {}", reason)).await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Auto-moderation configuration commands.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands(
        "status",
        "enable",
        "disable",
        "log_channel",
        "rule",
        "add_word",
        "remove_word",
        "allow_domain",
        "whitelist_guild",
        "new_account",
        "warnings",
        "clear_warnings"
    )
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show auto-moderation status and rule settings.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    let settings = ctx.data().automod.get_settings(guild_id).await?;

    let rules = RULES
        .iter()
        .map(|filter| {
            let rule = settings.rule(*filter);
            format!(
                "{} **{}** → {}",
                if rule.enabled { "✅" } else { "❌" },
                filter.label(),
                rule.action
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let new_account = if settings.new_account.enabled {
        format!(
            "Accounts under {} days: {}",
            settings.new_account.min_age_days,
            settings.new_account.policy.as_str()
        )
    } else {
        "Off".to_string()
    };

    let log_channel = settings
        .logging
        .target()
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "Not set".to_string());

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Auto-Moderation Status")
        .color(if settings.enabled { 0x00FF00 } else { 0xFF0000 })
        .field(
            "Status",
            if settings.enabled {
                "✅ Enabled"
            } else {
                "❌ Disabled"
            },
            true,
        )
        .field("Log Channel", log_channel, true)
        .field("Rules", rules, false)
        .field("New Accounts", new_account, false)
        .field(
            "Lists",
            format!(
                "{} filtered words • {} allowed domains • {} whitelisted servers",
                settings.profanity.words.len(),
                settings.links.allowed_domains.len(),
                settings.invites.whitelist.len()
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable auto-moderation.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    ctx.data().automod.set_enabled(guild_id, true).await?;

    ctx.say("✅ Auto-moderation has been **enabled**.").await?;
    Ok(())
}

/// Disable auto-moderation.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    ctx.data().automod.set_enabled(guild_id, false).await?;

    ctx.say("❌ Auto-moderation has been **disabled**.").await?;
    Ok(())
}

/// Set the channel that receives auto-moderation logs. Leave empty to stop logging.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Channel to log to"] channel: Option<serenity::Channel>,
) -> Result<(), Error> {
    let channel_id = channel.map(|c| c.id().get());

    let updated = update(ctx, move |s| {
        s.logging.enabled = channel_id.is_some();
        s.logging.log_channel_id = channel_id;
    })
    .await?;

    if updated.is_some() {
        let reply = match channel_id {
            Some(id) => format!("✅ Auto-moderation logs go to <#{}>.", id),
            None => "🛑 Auto-moderation logging disabled.".to_string(),
        };
        ctx.say(reply).await?;
    }
    Ok(())
}

/// Configure one rule.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn rule(
    ctx: Context<'_>,
    #[description = "Rule to configure"] rule: RuleChoice,
    #[description = "Turn the rule on or off"] enabled: Option<bool>,
    #[description = "What to do when it matches"] action: Option<ActionChoice>,
    #[description = "Warnings before an automatic mute"] warn_threshold: Option<u32>,
    #[description = "Mute length in minutes"] mute_minutes: Option<u64>,
    #[description = "Delete the message when warning"] delete_on_warn: Option<bool>,
) -> Result<(), Error> {
    let filter = FilterType::from(rule);

    let updated = update(ctx, move |s| {
        if let Some(cfg) = s.rule_mut(filter) {
            if let Some(v) = enabled {
                cfg.enabled = v;
            }
            if let Some(v) = action {
                cfg.action = v.into();
            }
            if let Some(v) = warn_threshold {
                cfg.warn_threshold = v;
            }
            if let Some(v) = mute_minutes {
                cfg.mute_duration_secs = v.saturating_mul(60);
            }
            if let Some(v) = delete_on_warn {
                cfg.delete_on_warn = v;
            }
        }
    })
    .await?;

    if let Some(settings) = updated {
        let cfg = settings.rule(filter);
        ctx.say(format!(
            "✅ **{}**: {} • action `{}` • {} warnings → {} min mute",
            filter.label(),
            if cfg.enabled { "enabled" } else { "disabled" },
            cfg.action,
            cfg.warn_threshold,
            cfg.mute_duration_secs / 60
        ))
        .await?;
    }
    Ok(())
}

/// Add a word to the filter list.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn add_word(
    ctx: Context<'_>,
    #[description = "Word or phrase to filter"] word: String,
) -> Result<(), Error> {
    let shown = word.trim().to_lowercase();
    if update(ctx, move |s| s.profanity.words.push(word))
        .await?
        .is_some()
    {
        ctx.say(format!("✅ Added `{}` to the word filter.", shown))
            .await?;
    }
    Ok(())
}

/// Remove a word from the filter list.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn remove_word(
    ctx: Context<'_>,
    #[description = "Word or phrase to stop filtering"] word: String,
) -> Result<(), Error> {
    let word = word.trim().to_lowercase();
    let target = word.clone();
    if update(ctx, move |s| s.profanity.words.retain(|w| *w != target))
        .await?
        .is_some()
    {
        ctx.say(format!("✅ Removed `{}` from the word filter.", word))
            .await?;
    }
    Ok(())
}

/// Allow or disallow a link domain.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn allow_domain(
    ctx: Context<'_>,
    #[description = "Domain, e.g. example.com"] domain: String,
    #[description = "Remove it from the allow-list instead"] remove: Option<bool>,
) -> Result<(), Error> {
    let domain = domain.trim().to_lowercase();
    let remove = remove.unwrap_or(false);
    let target = domain.clone();

    let updated = update(ctx, move |s| {
        if remove {
            s.links.allowed_domains.retain(|d| *d != target);
        } else {
            s.links.allowed_domains.push(target);
        }
    })
    .await?;

    if updated.is_some() {
        let verb = if remove { "no longer allowed" } else { "allowed" };
        ctx.say(format!("✅ Links to `{}` are {}.", domain, verb))
            .await?;
    }
    Ok(())
}

/// Allow or disallow invites to another server.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn whitelist_guild(
    ctx: Context<'_>,
    #[description = "Server ID"] guild_id: String,
    #[description = "Remove it from the whitelist instead"] remove: Option<bool>,
) -> Result<(), Error> {
    let Ok(target) = guild_id.trim().parse::<u64>() else {
        ctx.say("❌ That is not a valid server ID.").await?;
        return Ok(());
    };
    let remove = remove.unwrap_or(false);

    let updated = update(ctx, move |s| {
        if remove {
            s.invites.whitelist.retain(|id| *id != target);
        } else {
            s.invites.whitelist.push(target);
        }
    })
    .await?;

    if updated.is_some() {
        let verb = if remove { "no longer allowed" } else { "allowed" };
        ctx.say(format!("✅ Invites to server `{}` are {}.", target, verb))
            .await?;
    }
    Ok(())
}

/// Configure handling of newly created accounts.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn new_account(
    ctx: Context<'_>,
    #[description = "Turn the check on or off"] enabled: bool,
    #[description = "Minimum account age in days"] min_age_days: Option<u32>,
    #[description = "What to do with young accounts"] policy: Option<PolicyChoice>,
    #[description = "Timeout length in minutes for the restrict policy"] restrict_minutes: Option<
        u64,
    >,
) -> Result<(), Error> {
    let updated = update(ctx, move |s| {
        s.new_account.enabled = enabled;
        if let Some(v) = min_age_days {
            s.new_account.min_age_days = v;
        }
        if let Some(v) = policy {
            s.new_account.policy = v.into();
        }
        if let Some(v) = restrict_minutes {
            s.new_account.restrict_duration_secs = v.saturating_mul(60);
        }
    })
    .await?;

    if let Some(settings) = updated {
        let cfg = &settings.new_account;
        if cfg.enabled {
            ctx.say(format!(
                "✅ Accounts younger than {} days: **{}**.",
                cfg.min_age_days,
                cfg.policy.as_str()
            ))
            .await?;
        } else {
            ctx.say("🛑 New-account check disabled.").await?;
        }
    }
    Ok(())
}

/// Show a user's current warning count.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "User to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    let count = ctx
        .data()
        .automod
        .get_user_warnings(guild_id, user.id.get())
        .await;

    ctx.say(format!(
        "<@{}> has {} active auto-moderation warning{}.",
        user.id,
        count,
        if count == 1 { "" } else { "s" }
    ))
    .await?;
    Ok(())
}

/// Clear warnings for a user.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn clear_warnings(
    ctx: Context<'_>,
    #[description = "User to clear warnings for"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?.get();
    ctx.data()
        .automod
        .clear_user_warnings(guild_id, user.id.get())
        .await;

    ctx.say(format!("✅ Cleared all auto-moderation warnings for <@{}>.", user.id))
        .await?;
    Ok(())
}

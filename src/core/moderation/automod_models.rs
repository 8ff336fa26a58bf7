// Auto-moderation domain models.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts incoming messages into a `MessageRecord` and
// turns `ModerationLogEntry` values into embeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permission bit for ADMINISTRATOR (same layout as Discord's permission flags).
pub const PERMISSION_ADMINISTRATOR: u64 = 1 << 3;
/// Permission bit for MANAGE_MESSAGES.
pub const PERMISSION_MANAGE_MESSAGES: u64 = 1 << 13;

/// Longest message excerpt that goes into a log entry.
pub const LOG_CONTENT_LIMIT: usize = 1000;

/// What to do with a message once a rule has matched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Matched, but silenced
    None,
    /// Accumulates towards `warn_threshold`, then escalates to a mute
    Warn,
    Delete,
    Mute,
    Kick,
    Ban,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::None => "none",
            ActionKind::Warn => "warn",
            ActionKind::Delete => "delete",
            ActionKind::Mute => "mute",
            ActionKind::Kick => "kick",
            ActionKind::Ban => "ban",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Phishing,
    TokenGrabber,
    IpGrabber,
    Scam,
    Profanity,
    Links,
    Invite,
    Spam,
    RepeatedText,
    Caps,
    MentionSpam,
    Zalgo,
    EmojiSpam,
    NewAccount,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Phishing => "phishing",
            FilterType::TokenGrabber => "token_grabber",
            FilterType::IpGrabber => "ip_grabber",
            FilterType::Scam => "scam",
            FilterType::Profanity => "profanity",
            FilterType::Links => "links",
            FilterType::Invite => "invite",
            FilterType::Spam => "spam",
            FilterType::RepeatedText => "repeated_text",
            FilterType::Caps => "caps",
            FilterType::MentionSpam => "mention_spam",
            FilterType::Zalgo => "zalgo",
            FilterType::EmojiSpam => "emoji_spam",
            FilterType::NewAccount => "new_account",
        }
    }

    /// Human-readable label used in notices and log embeds.
    pub fn label(&self) -> &'static str {
        match self {
            FilterType::Phishing => "Phishing Link",
            FilterType::TokenGrabber => "Token Grabber",
            FilterType::IpGrabber => "IP Grabber",
            FilterType::Scam => "Scam",
            FilterType::Profanity => "Filtered Word",
            FilterType::Links => "Unauthorized Link",
            FilterType::Invite => "Invite Link",
            FilterType::Spam => "Message Spam",
            FilterType::RepeatedText => "Repeated Text",
            FilterType::Caps => "Excessive Caps",
            FilterType::MentionSpam => "Mention Spam",
            FilterType::Zalgo => "Zalgo Text",
            FilterType::EmojiSpam => "Emoji Spam",
            FilterType::NewAccount => "New Account",
        }
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Users and roles pinged by a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    pub user_ids: Vec<u64>,
    pub role_ids: Vec<u64>,
}

impl Mentions {
    pub fn total(&self) -> usize {
        self.user_ids.len() + self.role_ids.len()
    }
}

/// A normalized inbound guild message, as handed over by the message source.
/// Bot-authored and DM messages never reach the engine.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    /// Author's effective permission bits in the channel
    pub permissions: u64,
    pub account_created_at: DateTime<Utc>,
    pub content: String,
    pub mentions: Mentions,
}

impl MessageRecord {
    /// Privileged authors (message managers and admins) are exempt from every rule.
    pub fn is_privileged(&self) -> bool {
        self.permissions & (PERMISSION_MANAGE_MESSAGES | PERMISSION_ADMINISTRATOR) != 0
    }
}

/// A single rule hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub filter: FilterType,
    pub reason: String,
    pub action: ActionKind,
    /// Offending URL, domain, word or invite code, when there is one
    pub evidence: Option<String>,
}

impl RuleMatch {
    pub fn new(filter: FilterType, reason: impl Into<String>, action: ActionKind) -> Self {
        Self {
            filter,
            reason: reason.into(),
            action,
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// The side effect that was actually carried out for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedAction {
    None,
    Deleted,
    Warned { count: u32, threshold: u32 },
    Muted { duration_secs: u64 },
    Kicked,
    Banned,
    /// New-account monitor hit: logged, nothing else
    Monitored,
}

impl AppliedAction {
    pub fn label(&self) -> String {
        match self {
            AppliedAction::None => "None".to_string(),
            AppliedAction::Deleted => "Message deleted".to_string(),
            AppliedAction::Warned { count, threshold } => {
                format!("Warned ({}/{})", count, threshold)
            }
            AppliedAction::Muted { duration_secs } => {
                format!("Muted for {}", format_duration(*duration_secs))
            }
            AppliedAction::Kicked => "Kicked".to_string(),
            AppliedAction::Banned => "Banned".to_string(),
            AppliedAction::Monitored => "Monitored".to_string(),
        }
    }
}

/// Result of running the engine over one message. Always produced, even when
/// collaborators fail.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    /// The terminal rule that fired, if any
    pub violation: Option<RuleMatch>,
    /// A non-terminal new-account hit that was only logged
    pub monitored: Option<RuleMatch>,
    pub applied: Option<AppliedAction>,
    /// Sink failures swallowed while acting on the violation
    pub sink_errors: Vec<SinkError>,
}

impl EvaluationOutcome {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_violation(&self) -> bool {
        self.violation.is_some()
    }

    pub fn filter_type(&self) -> Option<FilterType> {
        self.violation.as_ref().map(|v| v.filter)
    }

    pub fn action(&self) -> Option<ActionKind> {
        self.violation.as_ref().map(|v| v.action)
    }
}

/// Structured payload for the guild's moderation log channel.
#[derive(Debug, Clone)]
pub struct ModerationLogEntry {
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub filter: FilterType,
    pub reason: String,
    pub action: AppliedAction,
    pub content: String,
    pub evidence: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ModerationLogEntry {
    pub fn new(
        message: &MessageRecord,
        rule: &RuleMatch,
        action: AppliedAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            user_id: message.user_id,
            filter: rule.filter,
            reason: rule.reason.clone(),
            action,
            content: truncate_chars(&message.content, LOG_CONTENT_LIMIT),
            evidence: rule.evidence.clone(),
            timestamp,
        }
    }
}

/// Errors reported by the moderation action sink or the invite resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Missing permission: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Platform error: {0}")]
    Transient(String),

    #[error("Timed out after {0} seconds")]
    TimedOut(u64),
}

/// Cut a string to at most `limit` characters without splitting a code point.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Render seconds as a short human duration ("5 minutes", "1 hour", "45 seconds").
pub fn format_duration(secs: u64) -> String {
    let (value, unit) = if secs >= 86_400 && secs % 86_400 == 0 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        (secs / 3_600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    format!("{} {}{}", value, unit, if value == 1 { "" } else { "s" })
}

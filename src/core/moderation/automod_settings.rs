// Per-guild auto-moderation settings.
//
// Every rule category gets its own typed record with explicit defaults.
// `#[serde(default)]` lets settings stored by an older build load cleanly;
// `validate()` runs once when settings are saved or loaded, so the engine
// never has to second-guess a value during evaluation.

use super::automod_models::{ActionKind, FilterType};
use super::automod_state::WINDOW_CAPACITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MUTE_SECS: u64 = 300;
/// Discord refuses timeouts longer than 28 days.
pub const MAX_MUTE_SECS: u64 = 28 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Settings shared by every rule category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub enabled: bool,
    pub action: ActionKind,
    /// Warnings before an automatic mute
    pub warn_threshold: u32,
    /// Whether `warn` also removes the offending message
    pub delete_on_warn: bool,
    pub mute_duration_secs: u64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: ActionKind::Warn,
            warn_threshold: 3,
            delete_on_warn: true,
            mute_duration_secs: DEFAULT_MUTE_SECS,
        }
    }
}

impl RuleConfig {
    fn with_action(enabled: bool, action: ActionKind) -> Self {
        Self {
            enabled,
            action,
            ..Default::default()
        }
    }

    fn validate(&self, name: &str) -> Result<(), SettingsError> {
        if self.warn_threshold == 0 {
            return Err(SettingsError::Invalid(format!(
                "{}: warn_threshold must be at least 1",
                name
            )));
        }
        if self.mute_duration_secs == 0 || self.mute_duration_secs > MAX_MUTE_SECS {
            return Err(SettingsError::Invalid(format!(
                "{}: mute duration must be between 1 second and 28 days",
                name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfanityFilter {
    pub rule: RuleConfig,
    pub words: Vec<String>,
}

impl Default for ProfanityFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::default(),
            words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFilter {
    pub rule: RuleConfig,
    /// A host is allowed if it equals an entry or is a subdomain of one
    pub allowed_domains: Vec<String>,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(false, ActionKind::Delete),
            allowed_domains: vec![
                "tenor.com".to_string(),
                "giphy.com".to_string(),
                "youtube.com".to_string(),
                "youtu.be".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteFilter {
    pub rule: RuleConfig,
    /// Guild IDs whose invites are always allowed
    pub whitelist: Vec<u64>,
    pub allow_partnered: bool,
    /// Treat invites that cannot be resolved as violations
    pub block_unresolved: bool,
}

impl Default for InviteFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(true, ActionKind::Delete),
            whitelist: Vec::new(),
            allow_partnered: true,
            block_unresolved: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamFilter {
    pub rule: RuleConfig,
    pub message_threshold: u32,
    pub time_threshold_secs: u64,
}

impl Default for SpamFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(true, ActionKind::Mute),
            message_threshold: 5,
            time_threshold_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatedTextFilter {
    pub rule: RuleConfig,
    /// Consecutive repeats of one character
    pub char_threshold: usize,
    /// Occurrences of one word (3+ letters) in a message
    pub word_threshold: usize,
}

impl Default for RepeatedTextFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::default(),
            char_threshold: 10,
            word_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsFilter {
    pub rule: RuleConfig,
    pub threshold_percent: u8,
    pub min_length: usize,
    pub min_letters: usize,
}

impl Default for CapsFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::default(),
            threshold_percent: 70,
            min_length: 10,
            min_letters: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionFilter {
    pub rule: RuleConfig,
    pub threshold: usize,
}

impl Default for MentionFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(true, ActionKind::Mute),
            threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmojiFilter {
    pub rule: RuleConfig,
    pub max_emojis: usize,
    pub max_percent: u8,
    /// The share check only applies once a message carries this many emojis
    pub percent_min_emojis: usize,
}

impl Default for EmojiFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(true, ActionKind::Delete),
            max_emojis: 10,
            max_percent: 70,
            percent_min_emojis: 3,
        }
    }
}

/// Settings for the pattern-list rules (phishing, IP grabber, scam).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternFilter {
    pub rule: RuleConfig,
    /// Appended to the built-in domain list
    pub extra_domains: Vec<String>,
    /// Appended to the built-in phrase list (scam only)
    pub extra_patterns: Vec<String>,
}

impl Default for PatternFilter {
    fn default() -> Self {
        Self {
            rule: RuleConfig::with_action(true, ActionKind::Delete),
            extra_domains: Vec::new(),
            extra_patterns: Vec::new(),
        }
    }
}

/// What happens to messages from accounts younger than `min_age_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewAccountPolicy {
    /// Log only; the message keeps going through the other rules
    Monitor,
    /// Time the author out
    Restrict,
    Kick,
}

impl NewAccountPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewAccountPolicy::Monitor => "monitor",
            NewAccountPolicy::Restrict => "restrict",
            NewAccountPolicy::Kick => "kick",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewAccountFilter {
    pub enabled: bool,
    pub min_age_days: u32,
    pub policy: NewAccountPolicy,
    pub restrict_duration_secs: u64,
}

impl Default for NewAccountFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            min_age_days: 7,
            policy: NewAccountPolicy::Monitor,
            restrict_duration_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub log_channel_id: Option<u64>,
}

impl LoggingConfig {
    /// The channel to post to, if logging is switched on and a channel is set.
    pub fn target(&self) -> Option<u64> {
        if self.enabled {
            self.log_channel_id
        } else {
            None
        }
    }
}

/// Complete auto-moderation configuration for one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoModSettings {
    pub enabled: bool,
    pub phishing: PatternFilter,
    pub token_grabber: RuleConfig,
    pub ip_grabber: PatternFilter,
    pub scam: PatternFilter,
    pub profanity: ProfanityFilter,
    pub links: LinkFilter,
    pub invites: InviteFilter,
    pub spam: SpamFilter,
    pub repeated_text: RepeatedTextFilter,
    pub caps: CapsFilter,
    pub mention_spam: MentionFilter,
    pub zalgo: RuleConfig,
    pub emoji_spam: EmojiFilter,
    pub new_account: NewAccountFilter,
    pub logging: LoggingConfig,
}

impl Default for AutoModSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            phishing: PatternFilter::default(),
            token_grabber: RuleConfig::with_action(true, ActionKind::Ban),
            ip_grabber: PatternFilter::default(),
            scam: PatternFilter::default(),
            profanity: ProfanityFilter::default(),
            links: LinkFilter::default(),
            invites: InviteFilter::default(),
            spam: SpamFilter::default(),
            repeated_text: RepeatedTextFilter::default(),
            caps: CapsFilter::default(),
            mention_spam: MentionFilter::default(),
            zalgo: RuleConfig::with_action(true, ActionKind::Delete),
            emoji_spam: EmojiFilter::default(),
            new_account: NewAccountFilter::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AutoModSettings {
    /// Reject values the engine cannot act on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.phishing.rule.validate("phishing")?;
        self.token_grabber.validate("token_grabber")?;
        self.ip_grabber.rule.validate("ip_grabber")?;
        self.scam.rule.validate("scam")?;
        self.profanity.rule.validate("profanity")?;
        self.links.rule.validate("links")?;
        self.invites.rule.validate("invites")?;
        self.spam.rule.validate("spam")?;
        self.repeated_text.rule.validate("repeated_text")?;
        self.caps.rule.validate("caps")?;
        self.mention_spam.rule.validate("mention_spam")?;
        self.zalgo.validate("zalgo")?;
        self.emoji_spam.rule.validate("emoji_spam")?;

        if self.spam.message_threshold < 2 {
            return Err(SettingsError::Invalid(
                "spam: message_threshold must be at least 2".to_string(),
            ));
        }
        if self.spam.message_threshold as usize > WINDOW_CAPACITY {
            return Err(SettingsError::Invalid(format!(
                "spam: message_threshold must be at most {}",
                WINDOW_CAPACITY
            )));
        }
        if self.spam.time_threshold_secs == 0 {
            return Err(SettingsError::Invalid(
                "spam: time_threshold_secs must be at least 1".to_string(),
            ));
        }
        if self.repeated_text.char_threshold < 2 || self.repeated_text.word_threshold < 2 {
            return Err(SettingsError::Invalid(
                "repeated_text: thresholds must be at least 2".to_string(),
            ));
        }
        if self.caps.threshold_percent == 0 || self.caps.threshold_percent > 100 {
            return Err(SettingsError::Invalid(
                "caps: threshold_percent must be between 1 and 100".to_string(),
            ));
        }
        if self.mention_spam.threshold == 0 {
            return Err(SettingsError::Invalid(
                "mention_spam: threshold must be at least 1".to_string(),
            ));
        }
        if self.emoji_spam.max_emojis == 0
            || self.emoji_spam.max_percent == 0
            || self.emoji_spam.max_percent > 100
        {
            return Err(SettingsError::Invalid(
                "emoji_spam: max_emojis must be positive and max_percent between 1 and 100"
                    .to_string(),
            ));
        }
        if self.new_account.restrict_duration_secs == 0
            || self.new_account.restrict_duration_secs > MAX_MUTE_SECS
        {
            return Err(SettingsError::Invalid(
                "new_account: restrict duration must be between 1 second and 28 days".to_string(),
            ));
        }
        for pattern in &self.scam.extra_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(SettingsError::Invalid(format!(
                    "scam: pattern `{}` does not compile: {}",
                    pattern, e
                )));
            }
        }
        if self.logging.enabled && self.logging.log_channel_id.is_none() {
            return Err(SettingsError::Invalid(
                "logging: enabled without a log channel".to_string(),
            ));
        }
        Ok(())
    }

    /// Shared rule settings for a filter. The new-account rule has no
    /// `RuleConfig` of its own; its restrict duration stands in for the mute.
    pub fn rule(&self, filter: FilterType) -> RuleConfig {
        match filter {
            FilterType::NewAccount => RuleConfig {
                enabled: self.new_account.enabled,
                action: ActionKind::Mute,
                warn_threshold: 1,
                delete_on_warn: false,
                mute_duration_secs: self.new_account.restrict_duration_secs,
            },
            other => self.rule_ref(other).cloned().unwrap_or_default(),
        }
    }

    fn rule_ref(&self, filter: FilterType) -> Option<&RuleConfig> {
        Some(match filter {
            FilterType::Phishing => &self.phishing.rule,
            FilterType::TokenGrabber => &self.token_grabber,
            FilterType::IpGrabber => &self.ip_grabber.rule,
            FilterType::Scam => &self.scam.rule,
            FilterType::Profanity => &self.profanity.rule,
            FilterType::Links => &self.links.rule,
            FilterType::Invite => &self.invites.rule,
            FilterType::Spam => &self.spam.rule,
            FilterType::RepeatedText => &self.repeated_text.rule,
            FilterType::Caps => &self.caps.rule,
            FilterType::MentionSpam => &self.mention_spam.rule,
            FilterType::Zalgo => &self.zalgo,
            FilterType::EmojiSpam => &self.emoji_spam.rule,
            FilterType::NewAccount => return None,
        })
    }

    /// Mutable access for the admin commands. `None` for the new-account
    /// rule, which is configured through its own fields.
    pub fn rule_mut(&mut self, filter: FilterType) -> Option<&mut RuleConfig> {
        Some(match filter {
            FilterType::Phishing => &mut self.phishing.rule,
            FilterType::TokenGrabber => &mut self.token_grabber,
            FilterType::IpGrabber => &mut self.ip_grabber.rule,
            FilterType::Scam => &mut self.scam.rule,
            FilterType::Profanity => &mut self.profanity.rule,
            FilterType::Links => &mut self.links.rule,
            FilterType::Invite => &mut self.invites.rule,
            FilterType::Spam => &mut self.spam.rule,
            FilterType::RepeatedText => &mut self.repeated_text.rule,
            FilterType::Caps => &mut self.caps.rule,
            FilterType::MentionSpam => &mut self.mention_spam.rule,
            FilterType::Zalgo => &mut self.zalgo,
            FilterType::EmojiSpam => &mut self.emoji_spam.rule,
            FilterType::NewAccount => return None,
        })
    }

    /// Lower-case, trim and de-duplicate every word and domain list.
    pub fn normalized(mut self) -> Self {
        normalize_list(&mut self.profanity.words);
        normalize_list(&mut self.links.allowed_domains);
        normalize_list(&mut self.phishing.extra_domains);
        normalize_list(&mut self.ip_grabber.extra_domains);
        normalize_list(&mut self.scam.extra_domains);
        self.invites.whitelist.sort_unstable();
        self.invites.whitelist.dedup();
        self
    }
}

fn normalize_list(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain_mut(|item| {
        *item = item.trim().to_lowercase();
        !item.is_empty() && seen.insert(item.clone())
    });
}

// Rule checkers for auto-moderation.
//
// Each checker is a pure predicate over a single message: it either returns a
// `RuleMatch` or nothing. Stateful rules (message rate) live in the state
// store, and invite resolution lives in the service because it needs the
// platform. Everything here is synchronous and cheap.

use super::automod_models::{ActionKind, FilterType, MessageRecord, RuleMatch};
use super::automod_settings::{
    CapsFilter, EmojiFilter, LinkFilter, MentionFilter, NewAccountFilter, NewAccountPolicy,
    PatternFilter, ProfanityFilter, RepeatedTextFilter, RuleConfig,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Domains that imitate Discord/Steam to steal accounts.
pub const PHISHING_DOMAINS: &[&str] = &[
    "discord-nitro",
    "discordnitro",
    "discord-gift",
    "discordgift",
    "discord-app.",
    "discordapp.gift",
    "dlscord",
    "discorcl",
    "dicsord",
    "disocrd",
    "discrod",
    "d1scord",
    "free-nitro",
    "nitro-gift",
    "nitrogift",
    "steamcommunity-",
    "steamcommunitty",
    "stearncommunity",
    "steamcomminuty",
    "steampowered-",
];

/// Known IP-logger and tracking link domains.
pub const IP_GRABBER_DOMAINS: &[&str] = &[
    "grabify.link",
    "iplogger.org",
    "iplogger.com",
    "iplogger.ru",
    "iplogger.co",
    "2no.co",
    "yip.su",
    "blasze.tk",
    "ps3cfw.com",
    "bmwforum.co",
    "leancoding.co",
    "quickmessage.us",
    "spottyfly.com",
    "stopify.co",
    "freegiftcards.co",
    "joinmy.site",
    "curiouscat.club",
    "catsnthings.fun",
    "iplis.ru",
    "ezstat.ru",
    "02ip.ru",
    "headshot.monster",
    "gamingfun.me",
    "screenshare.pics",
    "myprivate.pics",
];

/// Domains that only ever host giveaway and "free item" scams.
pub const SCAM_DOMAINS: &[&str] = &[
    "steamgift",
    "gift-steam",
    "csgo-skins",
    "free-skins",
    "skins-drop",
    "robux-free",
    "freerobux",
    "claim-nitro",
    "nitro-claim",
    "airdrop-claim",
];

/// Code that reads or ships a Discord token somewhere.
const TOKEN_GRABBER_PATTERNS: &[&str] = &[
    r"(?i)localstorage\s*(?:\.|\[)\s*(?:getitem\s*\(\s*)?['\x22]?token",
    r"(?i)webpackchunkdiscord_app",
    r"(?i)\bgettoken\s*\(\s*\)",
    r"(?i)document\s*\.\s*cookie",
    r"(?i)(?:appdata|roaming)[\\/]+discord(?:canary|ptb)?[\\/]+local\s+storage",
    r"(?i)local\s+storage[\\/]+leveldb",
];

/// Giveaway and impersonation phrasing common to scam posts.
const SCAM_PHRASES: &[&str] = &[
    r"(?i)\bfree\s+(?:discord\s+)?nitro\b",
    r"(?i)\bsteam\s+(?:gift|giveaway)\b",
    r"(?i)\b(?:claim|get|grab)\s+your\s+(?:free\s+)?(?:gift|reward|prize|nitro)\b",
    r"(?i)\bi(?:'| a)?m\s+leaving\s+(?:cs:?go|cs2|this\s+game)\b",
    r"(?i)\bwho\s+is\s+first\s*\?",
    r"(?i)\bcrypto\s+(?:airdrop|giveaway)\b",
    r"(?i)\bdouble\s+your\s+(?:btc|eth|crypto|bitcoin)\b",
];

const URL_PATTERN: &str = r"(?i)\bhttps?://[^\s<>]+";
const INVITE_PATTERN: &str =
    r"(?i)\b(?:https?://)?(?:www\.)?(?:discord\.gg|discord(?:app)?\.com/invite)/([a-z0-9-]{2,32})";
const CUSTOM_EMOJI_PATTERN: &str = r"<a?:[A-Za-z0-9_]{2,32}:\d{15,21}>";

/// Consecutive combining marks that count as "zalgo".
const ZALGO_RUN: usize = 3;

#[derive(Debug, Error)]
#[error("Failed to compile rule pattern `{pattern}`: {source}")]
pub struct PatternError {
    pattern: String,
    #[source]
    source: regex::Error,
}

fn compile(pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError {
        pattern: pattern.to_string(),
        source,
    })
}

/// Compiled patterns shared by every evaluation.
pub struct RuleSet {
    url: Regex,
    invite: Regex,
    custom_emoji: Regex,
    token_grabber: Vec<Regex>,
    scam_phrases: Vec<Regex>,
    /// Guild-supplied scam patterns, compiled on first use
    extra_patterns: DashMap<String, Option<Regex>>,
}

impl RuleSet {
    pub fn new() -> Result<Self, PatternError> {
        Ok(Self {
            url: compile(URL_PATTERN)?,
            invite: compile(INVITE_PATTERN)?,
            custom_emoji: compile(CUSTOM_EMOJI_PATTERN)?,
            token_grabber: TOKEN_GRABBER_PATTERNS
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            scam_phrases: SCAM_PHRASES
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            extra_patterns: DashMap::new(),
        })
    }

    /// 1. Known phishing domains.
    pub fn check_phishing(&self, content: &str, cfg: &PatternFilter) -> Option<RuleMatch> {
        let lowered = content.to_lowercase();
        find_domain(&lowered, PHISHING_DOMAINS, &cfg.extra_domains).map(|domain| {
            RuleMatch::new(
                FilterType::Phishing,
                "Message contains a known phishing link",
                cfg.rule.action,
            )
            .with_evidence(domain)
        })
    }

    /// 2. Code that looks like it exfiltrates credentials.
    pub fn check_token_grabber(&self, content: &str, cfg: &RuleConfig) -> Option<RuleMatch> {
        self.token_grabber
            .iter()
            .find_map(|re| re.find(content))
            .map(|m| {
                RuleMatch::new(
                    FilterType::TokenGrabber,
                    "Message contains token-grabbing code",
                    cfg.action,
                )
                .with_evidence(m.as_str())
            })
    }

    /// 3. IP logger links.
    pub fn check_ip_grabber(&self, content: &str, cfg: &PatternFilter) -> Option<RuleMatch> {
        let lowered = content.to_lowercase();
        find_domain(&lowered, IP_GRABBER_DOMAINS, &cfg.extra_domains).map(|domain| {
            RuleMatch::new(
                FilterType::IpGrabber,
                "Message contains an IP logger link",
                cfg.rule.action,
            )
            .with_evidence(domain)
        })
    }

    /// 4. Scam domains, or scam phrasing alongside a link.
    pub fn check_scam(&self, content: &str, cfg: &PatternFilter) -> Option<RuleMatch> {
        let lowered = content.to_lowercase();
        if let Some(domain) = find_domain(&lowered, SCAM_DOMAINS, &cfg.extra_domains) {
            return Some(
                RuleMatch::new(
                    FilterType::Scam,
                    "Message links to a known scam domain",
                    cfg.rule.action,
                )
                .with_evidence(domain),
            );
        }

        if !self.url.is_match(content) {
            return None;
        }

        let phrase = self
            .scam_phrases
            .iter()
            .find_map(|re| re.find(content).map(|m| m.as_str().to_string()))
            .or_else(|| self.match_extra_patterns(content, &cfg.extra_patterns));

        phrase.map(|phrase| {
            RuleMatch::new(
                FilterType::Scam,
                "Message looks like a scam",
                cfg.rule.action,
            )
            .with_evidence(phrase)
        })
    }

    fn match_extra_patterns(&self, content: &str, patterns: &[String]) -> Option<String> {
        for pattern in patterns {
            let compiled = self
                .extra_patterns
                .entry(pattern.clone())
                .or_insert_with(|| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid scam pattern `{}`: {}", pattern, e);
                        None
                    }
                })
                .clone();

            let found = compiled.and_then(|re| re.find(content).map(|m| m.as_str().to_string()));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// 6. Links to hosts outside the allow-list. Invite links are left to the
    /// invite rule.
    pub fn check_links(&self, content: &str, cfg: &LinkFilter) -> Option<RuleMatch> {
        for found in self.url.find_iter(content) {
            let raw = found.as_str();
            let Ok(parsed) = url::Url::parse(raw) else {
                continue;
            };
            let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) else {
                continue;
            };

            if is_invite_url(&host, parsed.path()) {
                continue;
            }

            if !is_domain_allowed(&host, &cfg.allowed_domains) {
                return Some(
                    RuleMatch::new(
                        FilterType::Links,
                        format!("Links to {} are not allowed", host),
                        cfg.rule.action,
                    )
                    .with_evidence(raw),
                );
            }
        }
        None
    }

    /// Invite codes in a message, in order of appearance, without duplicates.
    pub fn extract_invite_codes(&self, content: &str) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for caps in self.invite.captures_iter(content) {
            if let Some(code) = caps.get(1) {
                let code = code.as_str().to_string();
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
        }
        codes
    }

    /// 13. Too many emojis, or a message that is mostly emojis.
    pub fn check_emoji_spam(&self, content: &str, cfg: &EmojiFilter) -> Option<RuleMatch> {
        let custom = self.custom_emoji.find_iter(content).count();
        let remainder = self.custom_emoji.replace_all(content, "");

        let mut unicode = 0usize;
        let mut flags = 0usize;
        let mut other = 0usize;
        let mut chars = remainder.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_whitespace() || is_emoji_modifier(c) {
                continue;
            }
            // Keycaps: a digit, '#' or '*', optional U+FE0F, then U+20E3
            if matches!(c, '0'..='9' | '#' | '*') {
                let mut ahead = chars.clone();
                ahead.next_if_eq(&'\u{FE0F}');
                if ahead.next() == Some('\u{20E3}') {
                    chars = ahead;
                    unicode += 1;
                    continue;
                }
            }
            if is_regional_indicator(c) {
                flags += 1;
            } else if is_emoji(c) {
                unicode += 1;
            } else {
                other += 1;
            }
        }

        let emojis = custom + unicode + flags.div_ceil(2);
        if emojis == 0 {
            return None;
        }

        if emojis >= cfg.max_emojis {
            return Some(RuleMatch::new(
                FilterType::EmojiSpam,
                format!("Too many emojis ({}/{})", emojis, cfg.max_emojis),
                cfg.rule.action,
            ));
        }

        let total = emojis + other;
        if emojis >= cfg.percent_min_emojis && emojis * 100 >= cfg.max_percent as usize * total {
            return Some(RuleMatch::new(
                FilterType::EmojiSpam,
                format!(
                    "Message is {}% emojis (limit {}%)",
                    emojis * 100 / total,
                    cfg.max_percent
                ),
                cfg.rule.action,
            ));
        }
        None
    }
}

/// First built-in or guild-supplied domain fragment found in lower-cased content.
fn find_domain(lowered: &str, builtin: &[&str], extra: &[String]) -> Option<String> {
    builtin
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .find(|domain| !domain.is_empty() && lowered.contains(domain))
        .map(str::to_string)
}

fn is_invite_url(host: &str, path: &str) -> bool {
    let host = host.trim_start_matches("www.");
    match host {
        "discord.gg" => true,
        "discord.com" | "discordapp.com" => path.starts_with("/invite/"),
        _ => false,
    }
}

/// A host is allowed when it equals an allowed domain or is a subdomain of one.
pub fn is_domain_allowed(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|domain| {
        let domain = domain.trim_start_matches("www.");
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// 5. Filtered words, case-insensitive substring match.
pub fn check_profanity(content: &str, cfg: &ProfanityFilter) -> Option<RuleMatch> {
    let lowered = content.to_lowercase();
    cfg.words
        .iter()
        .find(|word| !word.is_empty() && lowered.contains(word.as_str()))
        .map(|word| {
            RuleMatch::new(
                FilterType::Profanity,
                "Message contains a filtered word",
                cfg.rule.action,
            )
            .with_evidence(word.clone())
        })
}

/// 9. One character repeated many times in a row, or one word repeated many
/// times in the message.
pub fn check_repeated_text(content: &str, cfg: &RepeatedTextFilter) -> Option<RuleMatch> {
    let mut run = 0usize;
    let mut previous: Option<char> = None;
    for c in content.chars() {
        if c.is_whitespace() {
            run = 0;
            previous = None;
            continue;
        }
        if previous == Some(c) {
            run += 1;
        } else {
            run = 1;
            previous = Some(c);
        }
        if run >= cfg.char_threshold {
            return Some(
                RuleMatch::new(
                    FilterType::RepeatedText,
                    format!("Character repeated {}+ times", cfg.char_threshold),
                    cfg.rule.action,
                )
                .with_evidence(c.to_string()),
            );
        }
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
    {
        let count = counts.entry(word.to_lowercase()).or_insert(0);
        *count += 1;
        if *count >= cfg.word_threshold {
            return Some(
                RuleMatch::new(
                    FilterType::RepeatedText,
                    format!("Word repeated {}+ times", cfg.word_threshold),
                    cfg.rule.action,
                )
                .with_evidence(word.to_lowercase()),
            );
        }
    }
    None
}

/// 10. Share of upper-case letters, once the message is long enough to judge.
pub fn check_caps(content: &str, cfg: &CapsFilter) -> Option<RuleMatch> {
    if content.chars().count() < cfg.min_length {
        return None;
    }

    let letters = content.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 || letters < cfg.min_letters {
        return None;
    }

    let upper = content.chars().filter(|c| c.is_uppercase()).count();
    if upper * 100 >= cfg.threshold_percent as usize * letters {
        Some(RuleMatch::new(
            FilterType::Caps,
            format!(
                "Too many capital letters ({}%, limit {}%)",
                upper * 100 / letters,
                cfg.threshold_percent
            ),
            cfg.rule.action,
        ))
    } else {
        None
    }
}

/// 11. User plus role mentions.
pub fn check_mention_spam(message: &MessageRecord, cfg: &MentionFilter) -> Option<RuleMatch> {
    let total = message.mentions.total();
    if total >= cfg.threshold {
        Some(RuleMatch::new(
            FilterType::MentionSpam,
            format!("Too many mentions ({}/{})", total, cfg.threshold),
            cfg.rule.action,
        ))
    } else {
        None
    }
}

/// 12. Runs of stacked combining diacritics.
pub fn check_zalgo(content: &str, cfg: &RuleConfig) -> Option<RuleMatch> {
    let mut run = 0usize;
    for c in content.chars() {
        if is_combining_mark(c) {
            run += 1;
            if run >= ZALGO_RUN {
                return Some(RuleMatch::new(
                    FilterType::Zalgo,
                    "Message contains zalgo text",
                    cfg.action,
                ));
            }
        } else {
            run = 0;
        }
    }
    None
}

/// 14. Account younger than the configured minimum age.
pub fn check_new_account(
    message: &MessageRecord,
    cfg: &NewAccountFilter,
    now: DateTime<Utc>,
) -> Option<RuleMatch> {
    let age_days = (now - message.account_created_at).num_days();
    if age_days >= cfg.min_age_days as i64 {
        return None;
    }

    let action = match cfg.policy {
        NewAccountPolicy::Monitor => ActionKind::None,
        NewAccountPolicy::Restrict => ActionKind::Mute,
        NewAccountPolicy::Kick => ActionKind::Kick,
    };

    Some(
        RuleMatch::new(
            FilterType::NewAccount,
            format!(
                "Account is {} day{} old (minimum {})",
                age_days,
                if age_days == 1 { "" } else { "s" },
                cfg.min_age_days
            ),
            action,
        )
        .with_evidence(cfg.policy.as_str()),
    )
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F
        | 0x0483..=0x0489
        | 0x1AB0..=0x1AFF
        | 0x1DC0..=0x1DFF
        | 0x20D0..=0x20FF
        | 0xFE20..=0xFE2F)
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1F1E5
        | 0x1F200..=0x1F3FA
        | 0x1F400..=0x1FAFF
        | 0x2600..=0x27BF
        | 0x2B00..=0x2BFF
        | 0x2300..=0x23FF)
}

fn is_regional_indicator(c: char) -> bool {
    matches!(c as u32, 0x1F1E6..=0x1F1FF)
}

/// Joiners, variation selectors and skin tones ride along with an emoji and
/// are not counted on their own.
fn is_emoji_modifier(c: char) -> bool {
    matches!(c as u32, 0x200D | 0xFE0E | 0xFE0F | 0x1F3FB..=0x1F3FF | 0x20E3)
}

// Auto-moderation engine - rule battery and action dispatcher.
//
// One call to `evaluate` runs the ordered checks against a message and acts on
// the first one that fires:
//
//   1 phishing      2 token grabber   3 IP grabber     4 scam
//   5 profanity     6 links           7 invites        8 message rate
//   9 repeated text 10 caps           11 mentions      12 zalgo
//   13 emoji spam   14 new account
//
// The new-account check is computed up front. Under the `monitor` policy it is
// only logged and the battery keeps going; otherwise it acts last, if nothing
// else matched.
//
// Warnings accumulate per (guild, user) and escalate to a mute once the
// rule's threshold is reached. Every sink call is bounded by a timeout and
// every failure is logged and swallowed, so `evaluate` always returns.

use super::automod_models::{
    ActionKind, AppliedAction, EvaluationOutcome, FilterType, MessageRecord, ModerationLogEntry,
    RuleMatch, SinkError, format_duration,
};
use super::automod_rules::{
    PatternError, RuleSet, check_caps, check_mention_spam, check_new_account, check_profanity,
    check_repeated_text, check_zalgo,
};
use super::automod_service::{InviteResolver, ModerationActionSink};
use super::automod_settings::{AutoModSettings, InviteFilter, NewAccountPolicy, RuleConfig};
use super::automod_state::{StateLimits, UserModState, UserStateStore};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Runtime knobs that are not per-guild.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Upper bound for any single sink or resolver call
    pub action_timeout: Duration,
    /// How long warning notices stay in the channel
    pub warn_notice_ttl: Duration,
    pub state_limits: StateLimits,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(10),
            warn_notice_ttl: Duration::from_secs(10),
            state_limits: StateLimits::default(),
        }
    }
}

pub struct AutoModEngine {
    rules: RuleSet,
    state: UserStateStore,
    options: EngineOptions,
}

impl AutoModEngine {
    pub fn new(options: EngineOptions) -> Result<Self, PatternError> {
        Ok(Self {
            rules: RuleSet::new()?,
            state: UserStateStore::new(options.state_limits),
            options,
        })
    }

    /// Evaluate a message as of now.
    pub async fn evaluate<K, R>(
        &self,
        message: &MessageRecord,
        settings: &AutoModSettings,
        sink: &K,
        invites: &R,
    ) -> EvaluationOutcome
    where
        K: ModerationActionSink + ?Sized,
        R: InviteResolver + ?Sized,
    {
        self.evaluate_at(message, settings, sink, invites, Utc::now())
            .await
    }

    /// Evaluate a message as of `now`.
    pub async fn evaluate_at<K, R>(
        &self,
        message: &MessageRecord,
        settings: &AutoModSettings,
        sink: &K,
        invites: &R,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome
    where
        K: ModerationActionSink + ?Sized,
        R: InviteResolver + ?Sized,
    {
        if !settings.enabled || message.is_privileged() {
            return EvaluationOutcome::clean();
        }

        // Held until the action is done; serializes this user's messages.
        let mut state = self
            .state
            .lock(message.guild_id, message.user_id, now)
            .await;
        let mut outcome = EvaluationOutcome::clean();

        let new_account = if settings.new_account.enabled {
            check_new_account(message, &settings.new_account, now)
        } else {
            None
        };

        if let Some(hit) = &new_account {
            if settings.new_account.policy == NewAccountPolicy::Monitor {
                tracing::info!(
                    guild_id = message.guild_id,
                    user_id = message.user_id,
                    "New account monitored: {}",
                    hit.reason
                );
                self.post_log(message, settings, hit, AppliedAction::Monitored, now, sink)
                    .await;
                outcome.monitored = Some(hit.clone());
            }
        }

        let violation = match self
            .run_checks(message, settings, invites, &mut state, now)
            .await
        {
            Some(hit) => Some(hit),
            None => new_account.filter(|hit| hit.action != ActionKind::None),
        };

        if let Some(hit) = violation {
            tracing::info!(
                guild_id = message.guild_id,
                user_id = message.user_id,
                filter = hit.filter.as_str(),
                action = hit.action.as_str(),
                "Auto-moderation rule matched: {}",
                hit.reason
            );

            let (applied, errors) = self
                .dispatch(&mut state, message, settings, &hit, now, sink)
                .await;
            outcome.applied = Some(applied);
            outcome.sink_errors = errors;
            outcome.violation = Some(hit);
        }

        outcome
    }

    /// Checks 1-13, first match wins.
    async fn run_checks<R>(
        &self,
        message: &MessageRecord,
        settings: &AutoModSettings,
        invites: &R,
        state: &mut UserModState,
        now: DateTime<Utc>,
    ) -> Option<RuleMatch>
    where
        R: InviteResolver + ?Sized,
    {
        let content = message.content.as_str();

        // Every message feeds the rate window, even if an earlier rule wins.
        if settings.spam.rule.enabled {
            state.record_message(
                now,
                chrono::Duration::seconds(settings.spam.time_threshold_secs as i64),
            );
        }

        if settings.phishing.rule.enabled {
            if let Some(hit) = self.rules.check_phishing(content, &settings.phishing) {
                return Some(hit);
            }
        }
        if settings.token_grabber.enabled {
            if let Some(hit) = self
                .rules
                .check_token_grabber(content, &settings.token_grabber)
            {
                return Some(hit);
            }
        }
        if settings.ip_grabber.rule.enabled {
            if let Some(hit) = self.rules.check_ip_grabber(content, &settings.ip_grabber) {
                return Some(hit);
            }
        }
        if settings.scam.rule.enabled {
            if let Some(hit) = self.rules.check_scam(content, &settings.scam) {
                return Some(hit);
            }
        }
        if settings.profanity.rule.enabled {
            if let Some(hit) = check_profanity(content, &settings.profanity) {
                return Some(hit);
            }
        }
        if settings.links.rule.enabled {
            if let Some(hit) = self.rules.check_links(content, &settings.links) {
                return Some(hit);
            }
        }
        if settings.invites.rule.enabled {
            if let Some(hit) = self
                .check_invites(message, &settings.invites, invites)
                .await
            {
                return Some(hit);
            }
        }
        if settings.spam.rule.enabled && state.take_burst(settings.spam.message_threshold) {
            return Some(RuleMatch::new(
                FilterType::Spam,
                format!(
                    "Sent {} messages in {} seconds",
                    settings.spam.message_threshold, settings.spam.time_threshold_secs
                ),
                settings.spam.rule.action,
            ));
        }
        if settings.repeated_text.rule.enabled {
            if let Some(hit) = check_repeated_text(content, &settings.repeated_text) {
                return Some(hit);
            }
        }
        if settings.caps.rule.enabled {
            if let Some(hit) = check_caps(content, &settings.caps) {
                return Some(hit);
            }
        }
        if settings.mention_spam.rule.enabled {
            if let Some(hit) = check_mention_spam(message, &settings.mention_spam) {
                return Some(hit);
            }
        }
        if settings.zalgo.enabled {
            if let Some(hit) = check_zalgo(content, &settings.zalgo) {
                return Some(hit);
            }
        }
        if settings.emoji_spam.rule.enabled {
            if let Some(hit) = self.rules.check_emoji_spam(content, &settings.emoji_spam) {
                return Some(hit);
            }
        }
        None
    }

    /// 7. Invites to other guilds. Unresolvable codes pass unless the guild
    /// opted into `block_unresolved`.
    async fn check_invites<R>(
        &self,
        message: &MessageRecord,
        cfg: &InviteFilter,
        invites: &R,
    ) -> Option<RuleMatch>
    where
        R: InviteResolver + ?Sized,
    {
        for code in self.rules.extract_invite_codes(&message.content) {
            let target = match self.bounded(invites.resolve_invite(&code)).await {
                Ok(Some(target)) => target,
                Ok(None) | Err(_) if cfg.block_unresolved => {
                    return Some(
                        RuleMatch::new(
                            FilterType::Invite,
                            "Message contains an invite that could not be verified",
                            cfg.rule.action,
                        )
                        .with_evidence(code),
                    );
                }
                Ok(None) => {
                    tracing::debug!(code = %code, "Invite did not resolve, letting it through");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(code = %code, "Invite lookup failed, letting it through: {}", e);
                    continue;
                }
            };

            let allowed = target.guild_id == Some(message.guild_id)
                || target
                    .guild_id
                    .is_some_and(|id| cfg.whitelist.contains(&id))
                || (cfg.allow_partnered && target.is_partnered());

            if !allowed {
                return Some(
                    RuleMatch::new(
                        FilterType::Invite,
                        "Invites to other servers are not allowed",
                        cfg.rule.action,
                    )
                    .with_evidence(format!("discord.gg/{}", code)),
                );
            }
        }
        None
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Carry out a match's action and log it.
    async fn dispatch<K>(
        &self,
        state: &mut UserModState,
        message: &MessageRecord,
        settings: &AutoModSettings,
        hit: &RuleMatch,
        now: DateTime<Utc>,
        sink: &K,
    ) -> (AppliedAction, Vec<SinkError>)
    where
        K: ModerationActionSink + ?Sized,
    {
        let cfg = settings.rule(hit.filter);
        let mut errors = Vec::new();
        let mut logged = hit.clone();

        let applied = match hit.action {
            ActionKind::None => return (AppliedAction::None, errors),

            ActionKind::Delete => {
                self.delete(message, sink, &mut errors).await;
                AppliedAction::Deleted
            }

            ActionKind::Warn => {
                if cfg.delete_on_warn {
                    self.delete(message, sink, &mut errors).await;
                }

                match state.add_warning(cfg.warn_threshold) {
                    Some(count) => {
                        let notice = format!(
                            "⚠️ <@{}> {} (warning {}/{})",
                            message.user_id, hit.reason, count, cfg.warn_threshold
                        );
                        self.notice(
                            message.channel_id,
                            &notice,
                            Some(self.options.warn_notice_ttl),
                            sink,
                            &mut errors,
                        )
                        .await;
                        AppliedAction::Warned {
                            count,
                            threshold: cfg.warn_threshold,
                        }
                    }
                    None => {
                        logged.reason = format!(
                            "{} (received {} warnings)",
                            hit.reason, cfg.warn_threshold
                        );
                        tracing::info!(
                            guild_id = message.guild_id,
                            user_id = message.user_id,
                            "Warning threshold reached, escalating to mute"
                        );
                        self.mute(message, &cfg, &logged.reason, sink, &mut errors)
                            .await
                    }
                }
            }

            ActionKind::Mute => {
                self.delete(message, sink, &mut errors).await;
                self.mute(message, &cfg, &hit.reason, sink, &mut errors)
                    .await
            }

            ActionKind::Kick => {
                self.delete(message, sink, &mut errors).await;
                let dm = format!("You were kicked by auto-moderation: {}", hit.reason);
                self.dm(message.user_id, &dm, sink).await;

                let result = self
                    .bounded(sink.kick_user(message.guild_id, message.user_id, &hit.reason))
                    .await;
                if self.record("kick_user", result, &mut errors) {
                    let notice = format!("👢 <@{}> has been kicked: {}", message.user_id, hit.reason);
                    self.notice(message.channel_id, &notice, None, sink, &mut errors)
                        .await;
                }
                AppliedAction::Kicked
            }

            ActionKind::Ban => {
                self.delete(message, sink, &mut errors).await;
                let dm = format!("You were banned by auto-moderation: {}", hit.reason);
                self.dm(message.user_id, &dm, sink).await;

                let result = self
                    .bounded(sink.ban_user(message.guild_id, message.user_id, &hit.reason))
                    .await;
                if self.record("ban_user", result, &mut errors) {
                    let notice = format!("🔨 <@{}> has been banned: {}", message.user_id, hit.reason);
                    self.notice(message.channel_id, &notice, None, sink, &mut errors)
                        .await;
                }
                AppliedAction::Banned
            }
        };

        if let Some(error) = self
            .post_log(message, settings, &logged, applied, now, sink)
            .await
        {
            errors.push(error);
        }

        (applied, errors)
    }

    async fn mute<K>(
        &self,
        message: &MessageRecord,
        cfg: &RuleConfig,
        reason: &str,
        sink: &K,
        errors: &mut Vec<SinkError>,
    ) -> AppliedAction
    where
        K: ModerationActionSink + ?Sized,
    {
        let duration_secs = cfg.mute_duration_secs;
        let result = self
            .bounded(sink.mute_user(message.guild_id, message.user_id, duration_secs, reason))
            .await;

        if self.record("mute_user", result, errors) {
            let notice = format!(
                "🔇 <@{}> has been muted for {}: {}",
                message.user_id,
                format_duration(duration_secs),
                reason
            );
            self.notice(message.channel_id, &notice, None, sink, errors)
                .await;
        }
        AppliedAction::Muted { duration_secs }
    }

    /// Delete the offending message. Already gone counts as done.
    async fn delete<K>(&self, message: &MessageRecord, sink: &K, errors: &mut Vec<SinkError>)
    where
        K: ModerationActionSink + ?Sized,
    {
        let result = match self
            .bounded(sink.delete_message(message.channel_id, message.message_id))
            .await
        {
            Err(SinkError::NotFound(_)) => Ok(()),
            other => other,
        };
        self.record("delete_message", result, errors);
    }

    /// DM failures are expected (closed DMs) and never block the action.
    async fn dm<K>(&self, user_id: u64, text: &str, sink: &K)
    where
        K: ModerationActionSink + ?Sized,
    {
        if let Err(e) = self.bounded(sink.notify_user_dm(user_id, text)).await {
            tracing::debug!(user_id, "Could not DM user: {}", e);
        }
    }

    async fn notice<K>(
        &self,
        channel_id: u64,
        text: &str,
        ttl: Option<Duration>,
        sink: &K,
        errors: &mut Vec<SinkError>,
    ) where
        K: ModerationActionSink + ?Sized,
    {
        let result = self
            .bounded(sink.post_channel_notice(channel_id, text, ttl))
            .await;
        self.record("post_channel_notice", result, errors);
    }

    /// Post to the guild's log channel if logging is on. Returns the failure,
    /// if any.
    async fn post_log<K>(
        &self,
        message: &MessageRecord,
        settings: &AutoModSettings,
        hit: &RuleMatch,
        applied: AppliedAction,
        now: DateTime<Utc>,
        sink: &K,
    ) -> Option<SinkError>
    where
        K: ModerationActionSink + ?Sized,
    {
        let log_channel_id = settings.logging.target()?;
        let entry = ModerationLogEntry::new(message, hit, applied, now);

        match self.bounded(sink.post_log_embed(log_channel_id, &entry)).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    guild_id = message.guild_id,
                    log_channel_id,
                    "Failed to post auto-moderation log: {}",
                    e
                );
                Some(e)
            }
        }
    }

    /// Log a failed sink call and keep it for the outcome. Returns whether the
    /// call succeeded.
    fn record(
        &self,
        operation: &'static str,
        result: Result<(), SinkError>,
        errors: &mut Vec<SinkError>,
    ) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                if matches!(e, SinkError::PermissionDenied(_)) {
                    tracing::warn!(operation, "Bot lacks permission for auto-moderation: {}", e);
                } else {
                    tracing::warn!(operation, "Auto-moderation action failed: {}", e);
                }
                errors.push(e);
                false
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, SinkError>
    where
        F: Future<Output = Result<T, SinkError>>,
    {
        match tokio::time::timeout(self.options.action_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::TimedOut(self.options.action_timeout.as_secs())),
        }
    }

    // ========================================================================
    // STATE ACCESS
    // ========================================================================

    pub async fn warning_count(&self, guild_id: u64, user_id: u64) -> u32 {
        self.state.warnings(guild_id, user_id).await
    }

    pub async fn clear_warnings(&self, guild_id: u64, user_id: u64) {
        self.state.clear_warnings(guild_id, user_id).await
    }

    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let removed = self.state.prune_idle(now);
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.state.len(),
                "Pruned idle auto-moderation state"
            );
        }
        removed
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::automod_models::{Mentions, PERMISSION_MANAGE_MESSAGES};
    use crate::core::moderation::automod_service::InviteTarget;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const GUILD: u64 = 1000;
    const OTHER_GUILD: u64 = 2000;
    const LOG_CHANNEL: u64 = 555;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Delete(u64),
        Mute { user_id: u64, duration_secs: u64 },
        Kick(u64),
        Ban(u64),
        Dm(u64),
        Notice { text: String, ttl: Option<Duration> },
        Log(FilterType),
    }

    /// Records every call; individual operations can be made to fail.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<Call>>,
        deleted: Mutex<Vec<u64>>,
        failures: HashMap<&'static str, SinkError>,
        log_entries: Mutex<Vec<ModerationLogEntry>>,
    }

    impl RecordingSink {
        fn failing(operation: &'static str, error: SinkError) -> Self {
            let mut sink = Self::default();
            sink.failures.insert(operation, error);
            sink
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, operation: &'static str, call: Call) -> Result<(), SinkError> {
            if let Some(error) = self.failures.get(operation) {
                return Err(error.clone());
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn mutes(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Mute { .. }))
                .count()
        }
    }

    #[async_trait]
    impl ModerationActionSink for RecordingSink {
        async fn delete_message(&self, _channel_id: u64, message_id: u64) -> Result<(), SinkError> {
            // Deleting twice behaves like the platform: the second one is a 404.
            {
                let mut deleted = self.deleted.lock().unwrap();
                if deleted.contains(&message_id) {
                    return Err(SinkError::NotFound("Unknown Message".to_string()));
                }
                deleted.push(message_id);
            }
            self.push("delete_message", Call::Delete(message_id))
        }

        async fn mute_user(
            &self,
            _guild_id: u64,
            user_id: u64,
            duration_secs: u64,
            _reason: &str,
        ) -> Result<(), SinkError> {
            self.push(
                "mute_user",
                Call::Mute {
                    user_id,
                    duration_secs,
                },
            )
        }

        async fn kick_user(&self, _: u64, user_id: u64, _: &str) -> Result<(), SinkError> {
            self.push("kick_user", Call::Kick(user_id))
        }

        async fn ban_user(&self, _: u64, user_id: u64, _: &str) -> Result<(), SinkError> {
            self.push("ban_user", Call::Ban(user_id))
        }

        async fn notify_user_dm(&self, user_id: u64, _: &str) -> Result<(), SinkError> {
            self.push("notify_user_dm", Call::Dm(user_id))
        }

        async fn post_channel_notice(
            &self,
            _channel_id: u64,
            text: &str,
            ttl: Option<Duration>,
        ) -> Result<(), SinkError> {
            self.push(
                "post_channel_notice",
                Call::Notice {
                    text: text.to_string(),
                    ttl,
                },
            )
        }

        async fn post_log_embed(
            &self,
            log_channel_id: u64,
            entry: &ModerationLogEntry,
        ) -> Result<(), SinkError> {
            assert_eq!(log_channel_id, LOG_CHANNEL);
            self.log_entries.lock().unwrap().push(entry.clone());
            self.push("post_log_embed", Call::Log(entry.filter))
        }
    }

    /// Resolves codes from a fixed table; anything else is unknown.
    #[derive(Default)]
    struct StaticInvites {
        targets: HashMap<String, InviteTarget>,
        fail: bool,
    }

    impl StaticInvites {
        fn with(code: &str, guild_id: u64, features: &[&str]) -> Self {
            let mut invites = Self::default();
            invites.targets.insert(
                code.to_string(),
                InviteTarget {
                    guild_id: Some(guild_id),
                    guild_features: features.iter().map(|f| f.to_string()).collect(),
                },
            );
            invites
        }
    }

    #[async_trait]
    impl InviteResolver for StaticInvites {
        async fn resolve_invite(&self, code: &str) -> Result<Option<InviteTarget>, SinkError> {
            if self.fail {
                return Err(SinkError::Transient("gateway hiccup".to_string()));
            }
            Ok(self.targets.get(code).cloned())
        }
    }

    /// Resolver that never answers.
    struct HangingInvites;

    #[async_trait]
    impl InviteResolver for HangingInvites {
        async fn resolve_invite(&self, _: &str) -> Result<Option<InviteTarget>, SinkError> {
            std::future::pending().await
        }
    }

    fn engine() -> AutoModEngine {
        AutoModEngine::new(EngineOptions::default()).unwrap()
    }

    fn settings() -> AutoModSettings {
        let mut settings = AutoModSettings {
            enabled: true,
            ..Default::default()
        };
        settings.logging.enabled = true;
        settings.logging.log_channel_id = Some(LOG_CHANNEL);
        settings
    }

    fn message(id: u64, content: &str) -> MessageRecord {
        MessageRecord {
            message_id: id,
            guild_id: GUILD,
            channel_id: 10,
            user_id: 42,
            permissions: 0,
            account_created_at: Utc::now() - ChronoDuration::days(365),
            content: content.to_string(),
            mentions: Mentions::default(),
        }
    }

    fn caps_warn_settings() -> AutoModSettings {
        let mut settings = settings();
        settings.caps.rule.action = ActionKind::Warn;
        settings.caps.rule.warn_threshold = 3;
        settings.caps.rule.mute_duration_secs = 600;
        // Keep rapid test messages from tripping the rate rule
        settings.spam.rule.enabled = false;
        settings
    }

    #[tokio::test]
    async fn test_privileged_users_are_exempt() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut msg = message(1, "https://grabify.link/abc FREE NITRO");
        msg.permissions = PERMISSION_MANAGE_MESSAGES;

        let outcome = engine
            .evaluate(&msg, &settings(), &sink, &StaticInvites::default())
            .await;

        assert!(!outcome.is_violation());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_guild_never_matches() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.enabled = false;

        let outcome = engine
            .evaluate(
                &message(1, "https://grabify.link/abc"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert!(!outcome.is_violation());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clean_message_passes() {
        let engine = engine();
        let sink = RecordingSink::default();

        let outcome = engine
            .evaluate(
                &message(1, "Hello everyone, how was your weekend?"),
                &settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert!(!outcome.is_violation());
        assert!(outcome.applied.is_none());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_phishing_beats_profanity() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.profanity.words = vec!["scumbag".to_string()];

        let outcome = engine
            .evaluate(
                &message(1, "scumbag, claim at https://discord-nitro.gift/free"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::Phishing));
        assert_eq!(outcome.filter_type().map(|f| f.as_str()), Some("phishing"));
    }

    #[tokio::test]
    async fn test_disabled_rule_is_skipped() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.phishing.rule.enabled = false;
        settings.profanity.words = vec!["scumbag".to_string()];

        let outcome = engine
            .evaluate(
                &message(1, "scumbag, claim at https://discord-nitro.gift/free"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::Profanity));
    }

    #[tokio::test]
    async fn test_warn_escalates_to_mute_on_threshold() {
        let engine = engine();
        let sink = RecordingSink::default();
        let settings = caps_warn_settings();
        let invites = StaticInvites::default();

        for id in 1..=2 {
            let outcome = engine
                .evaluate(&message(id, "THIS IS VERY LOUD TEXT"), &settings, &sink, &invites)
                .await;
            assert_eq!(
                outcome.applied,
                Some(AppliedAction::Warned {
                    count: id as u32,
                    threshold: 3
                })
            );
        }
        assert_eq!(sink.mutes(), 0);

        let outcome = engine
            .evaluate(&message(3, "THIS IS VERY LOUD TEXT"), &settings, &sink, &invites)
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::Caps));
        assert_eq!(
            outcome.applied,
            Some(AppliedAction::Muted { duration_secs: 600 })
        );
        assert!(sink.calls().contains(&Call::Mute {
            user_id: 42,
            duration_secs: 600
        }));
        assert_eq!(engine.warning_count(GUILD, 42).await, 0);

        // The next offence starts from one again
        let outcome = engine
            .evaluate(&message(4, "THIS IS VERY LOUD TEXT"), &settings, &sink, &invites)
            .await;
        assert_eq!(
            outcome.applied,
            Some(AppliedAction::Warned {
                count: 1,
                threshold: 3
            })
        );
        assert_eq!(sink.mutes(), 1);

        let entries = sink.log_entries.lock().unwrap();
        assert!(entries[2].reason.contains("received 3 warnings"));
    }

    #[tokio::test]
    async fn test_warn_notice_self_deletes() {
        let engine = engine();
        let sink = RecordingSink::default();

        engine
            .evaluate(
                &message(1, "THIS IS VERY LOUD TEXT"),
                &caps_warn_settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        let calls = sink.calls();
        assert_eq!(calls[0], Call::Delete(1));
        match &calls[1] {
            Call::Notice { text, ttl } => {
                assert!(text.contains("warning 1/3"));
                assert_eq!(*ttl, Some(Duration::from_secs(10)));
            }
            other => panic!("expected a notice, got {:?}", other),
        }
        assert_eq!(calls[2], Call::Log(FilterType::Caps));
    }

    #[tokio::test]
    async fn test_warn_without_delete() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = caps_warn_settings();
        settings.caps.rule.delete_on_warn = false;

        engine
            .evaluate(
                &message(1, "THIS IS VERY LOUD TEXT"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert!(!sink.calls().iter().any(|c| matches!(c, Call::Delete(_))));
    }

    #[tokio::test]
    async fn test_concurrent_warnings_escalate_once() {
        let engine = std::sync::Arc::new(engine());
        let sink = std::sync::Arc::new(RecordingSink::default());
        let settings = std::sync::Arc::new(caps_warn_settings());

        let mut handles = Vec::new();
        for id in 1..=6u64 {
            let engine = engine.clone();
            let sink = sink.clone();
            let settings = settings.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .evaluate(
                        &message(id, "THIS IS VERY LOUD TEXT"),
                        &settings,
                        sink.as_ref(),
                        &StaticInvites::default(),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Six warnings at threshold three: exactly two mutes, counter back at 0
        assert_eq!(sink.mutes(), 2);
        assert_eq!(engine.warning_count(GUILD, 42).await, 0);
    }

    #[tokio::test]
    async fn test_spam_window_triggers_on_fifth_message() {
        let engine = engine();
        let sink = RecordingSink::default();
        let settings = settings();
        let invites = StaticInvites::default();
        let start = Utc::now();

        for i in 0..4 {
            let outcome = engine
                .evaluate_at(
                    &message(i, "hi"),
                    &settings,
                    &sink,
                    &invites,
                    start + ChronoDuration::seconds(i as i64),
                )
                .await;
            assert!(!outcome.is_violation(), "message {} should pass", i);
        }

        let outcome = engine
            .evaluate_at(
                &message(4, "hi"),
                &settings,
                &sink,
                &invites,
                start + ChronoDuration::milliseconds(4500),
            )
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::Spam));
        assert_eq!(outcome.action(), Some(ActionKind::Mute));

        // The burst was consumed; the next message starts a fresh window
        let outcome = engine
            .evaluate_at(
                &message(5, "hi"),
                &settings,
                &sink,
                &invites,
                start + ChronoDuration::seconds(5),
            )
            .await;
        assert!(!outcome.is_violation());
    }

    #[tokio::test]
    async fn test_burst_survives_an_earlier_rule_winning() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.profanity.words = vec!["darn".to_string()];
        settings.profanity.rule.action = ActionKind::None;
        let invites = StaticInvites::default();
        let start = Utc::now();

        for i in 0..4 {
            let outcome = engine
                .evaluate_at(
                    &message(i, "hi"),
                    &settings,
                    &sink,
                    &invites,
                    start + ChronoDuration::milliseconds(i as i64 * 400),
                )
                .await;
            assert!(!outcome.is_violation());
        }

        // Fifth message completes the burst but profanity ranks higher
        let outcome = engine
            .evaluate_at(
                &message(4, "darn it"),
                &settings,
                &sink,
                &invites,
                start + ChronoDuration::milliseconds(1600),
            )
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::Profanity));
        assert_eq!(outcome.applied, Some(AppliedAction::None));

        let outcome = engine
            .evaluate_at(
                &message(5, "hi"),
                &settings,
                &sink,
                &invites,
                start + ChronoDuration::milliseconds(2000),
            )
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::Spam));
        assert_eq!(sink.mutes(), 1);
    }

    #[tokio::test]
    async fn test_spam_window_spread_out_passes() {
        let engine = engine();
        let sink = RecordingSink::default();
        let settings = settings();
        let invites = StaticInvites::default();
        let start = Utc::now();

        for i in 0..5i64 {
            let outcome = engine
                .evaluate_at(
                    &message(i as u64, "hi"),
                    &settings,
                    &sink,
                    &invites,
                    start + ChronoDuration::milliseconds(i * 2500),
                )
                .await;
            assert!(!outcome.is_violation());
        }
    }

    #[tokio::test]
    async fn test_delete_of_missing_message_is_success() {
        let engine = engine();
        let sink = RecordingSink::default();
        // Already removed by someone else
        sink.deleted.lock().unwrap().push(1);

        let outcome = engine
            .evaluate(
                &message(1, "https://grabify.link/abc"),
                &settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(outcome.applied, Some(AppliedAction::Deleted));
        assert!(outcome.sink_errors.is_empty());
    }

    #[tokio::test]
    async fn test_invite_to_other_guild_is_deleted() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.invites.whitelist = Vec::new();
        settings.invites.allow_partnered = false;
        let invites = StaticInvites::with("abc123", OTHER_GUILD, &["COMMUNITY"]);

        let outcome = engine
            .evaluate(
                &message(77, "check this discord.gg/abc123"),
                &settings,
                &sink,
                &invites,
            )
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::Invite));
        assert_eq!(outcome.filter_type().map(|f| f.as_str()), Some("invite"));
        assert_eq!(outcome.action(), Some(ActionKind::Delete));
        assert_eq!(outcome.applied, Some(AppliedAction::Deleted));
        assert!(sink.calls().contains(&Call::Delete(77)));
    }

    #[tokio::test]
    async fn test_invite_exceptions() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();

        // Same guild
        let invites = StaticInvites::with("home", GUILD, &[]);
        let outcome = engine
            .evaluate(&message(1, "discord.gg/home"), &settings, &sink, &invites)
            .await;
        assert!(!outcome.is_violation());

        // Whitelisted guild
        settings.invites.whitelist = vec![OTHER_GUILD];
        let invites = StaticInvites::with("friend", OTHER_GUILD, &[]);
        let outcome = engine
            .evaluate(&message(2, "discord.gg/friend"), &settings, &sink, &invites)
            .await;
        assert!(!outcome.is_violation());

        // Partnered guild
        settings.invites.whitelist.clear();
        settings.invites.allow_partnered = true;
        let invites = StaticInvites::with("big", 3000, &["PARTNERED"]);
        let outcome = engine
            .evaluate(&message(3, "discord.gg/big"), &settings, &sink, &invites)
            .await;
        assert!(!outcome.is_violation());
    }

    #[tokio::test]
    async fn test_unresolved_invites_fail_open_by_default() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        let invites = StaticInvites {
            fail: true,
            ..Default::default()
        };

        let outcome = engine
            .evaluate(&message(1, "discord.gg/whatever"), &settings, &sink, &invites)
            .await;
        assert!(!outcome.is_violation());

        settings.invites.block_unresolved = true;
        let outcome = engine
            .evaluate(&message(2, "discord.gg/whatever"), &settings, &sink, &invites)
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::Invite));
    }

    #[tokio::test]
    async fn test_hanging_resolver_times_out() {
        let engine = AutoModEngine::new(EngineOptions {
            action_timeout: Duration::from_millis(50),
            ..Default::default()
        })
        .unwrap();
        let sink = RecordingSink::default();

        let outcome = engine
            .evaluate(&message(1, "discord.gg/slow"), &settings(), &sink, &HangingInvites)
            .await;
        assert!(!outcome.is_violation());
    }

    #[tokio::test]
    async fn test_new_account_monitor_continues() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.new_account.enabled = true;
        settings.new_account.min_age_days = 7;
        settings.new_account.policy = NewAccountPolicy::Monitor;

        let mut msg = message(1, "hello there, nice to meet you all");
        msg.account_created_at = Utc::now() - ChronoDuration::days(2);

        let outcome = engine
            .evaluate(&msg, &settings, &sink, &StaticInvites::default())
            .await;

        assert!(!outcome.is_violation());
        assert_eq!(
            outcome.monitored.as_ref().map(|m| m.filter),
            Some(FilterType::NewAccount)
        );
        assert_eq!(sink.calls(), vec![Call::Log(FilterType::NewAccount)]);

        // Later rules still run for the same young account
        let mut msg = message(2, "https://grabify.link/abc");
        msg.account_created_at = Utc::now() - ChronoDuration::days(2);
        let outcome = engine
            .evaluate(&msg, &settings, &sink, &StaticInvites::default())
            .await;
        assert_eq!(outcome.filter_type(), Some(FilterType::IpGrabber));
        assert!(outcome.monitored.is_some());
        assert!(sink.calls().contains(&Call::Delete(2)));
    }

    #[tokio::test]
    async fn test_new_account_kick_policy() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.new_account.enabled = true;
        settings.new_account.policy = NewAccountPolicy::Kick;

        let mut msg = message(1, "hello there");
        msg.account_created_at = Utc::now() - ChronoDuration::hours(3);

        let outcome = engine
            .evaluate(&msg, &settings, &sink, &StaticInvites::default())
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::NewAccount));
        assert_eq!(outcome.applied, Some(AppliedAction::Kicked));
        let calls = sink.calls();
        assert!(calls.contains(&Call::Dm(42)));
        assert!(calls.contains(&Call::Kick(42)));
    }

    #[tokio::test]
    async fn test_new_account_restrict_policy() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.new_account.enabled = true;
        settings.new_account.policy = NewAccountPolicy::Restrict;
        settings.new_account.restrict_duration_secs = 7200;

        let mut msg = message(1, "hello there");
        msg.account_created_at = Utc::now() - ChronoDuration::hours(3);

        let outcome = engine
            .evaluate(&msg, &settings, &sink, &StaticInvites::default())
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::NewAccount));
        assert_eq!(
            outcome.applied,
            Some(AppliedAction::Muted {
                duration_secs: 7200
            })
        );
        assert!(sink.calls().contains(&Call::Mute {
            user_id: 42,
            duration_secs: 7200
        }));
    }

    #[tokio::test]
    async fn test_dm_failure_does_not_block_ban() {
        let engine = engine();
        let sink = RecordingSink::failing(
            "notify_user_dm",
            SinkError::PermissionDenied("Cannot send messages to this user".to_string()),
        );

        let outcome = engine
            .evaluate(
                &message(1, "localStorage.getItem('token')"),
                &settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::TokenGrabber));
        assert_eq!(outcome.applied, Some(AppliedAction::Banned));
        assert!(sink.calls().contains(&Call::Ban(42)));
        assert!(outcome.sink_errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_permission_is_swallowed() {
        let engine = engine();
        let sink = RecordingSink::failing(
            "ban_user",
            SinkError::PermissionDenied("Missing Permissions".to_string()),
        );

        let outcome = engine
            .evaluate(
                &message(1, "localStorage.getItem('token')"),
                &settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert!(outcome.is_violation());
        assert_eq!(
            outcome.sink_errors,
            vec![SinkError::PermissionDenied("Missing Permissions".to_string())]
        );
        // No "has been banned" notice for a ban that didn't happen
        assert!(!sink
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Notice { .. })));
    }

    #[tokio::test]
    async fn test_action_none_only_matches() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.caps.rule.action = ActionKind::None;

        let outcome = engine
            .evaluate(
                &message(1, "THIS IS VERY LOUD TEXT"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(outcome.filter_type(), Some(FilterType::Caps));
        assert_eq!(outcome.applied, Some(AppliedAction::None));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_log_entry_carries_evidence_and_truncated_content() {
        let engine = engine();
        let sink = RecordingSink::default();
        let content = format!("https://grabify.link/abc {}", "x ".repeat(1000));

        engine
            .evaluate(
                &message(1, &content),
                &settings(),
                &sink,
                &StaticInvites::default(),
            )
            .await;

        let entries = sink.log_entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].evidence.as_deref(), Some("grabify.link"));
        assert_eq!(entries[0].content.chars().count(), 1000);
        assert_eq!(entries[0].action, AppliedAction::Deleted);
    }

    #[tokio::test]
    async fn test_logging_disabled_posts_nothing() {
        let engine = engine();
        let sink = RecordingSink::default();
        let mut settings = settings();
        settings.logging.enabled = false;

        engine
            .evaluate(
                &message(1, "https://grabify.link/abc"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;

        assert_eq!(sink.calls(), vec![Call::Delete(1)]);
    }

    #[tokio::test]
    async fn test_clear_warnings() {
        let engine = engine();
        let sink = RecordingSink::default();
        let settings = caps_warn_settings();

        engine
            .evaluate(
                &message(1, "THIS IS VERY LOUD TEXT"),
                &settings,
                &sink,
                &StaticInvites::default(),
            )
            .await;
        assert_eq!(engine.warning_count(GUILD, 42).await, 1);

        engine.clear_warnings(GUILD, 42).await;
        assert_eq!(engine.warning_count(GUILD, 42).await, 0);
    }
}

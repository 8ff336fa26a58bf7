// Auto-moderation service - ports and the guild-facing entry point.
//
// This file defines:
// - The storage port for per-guild settings (`AutoModStore`)
// - The platform ports the engine acts through (`ModerationActionSink`,
//   `InviteResolver`)
// - `AutoModService`, which loads settings and hands messages to the engine
//
// NO Discord dependencies here - just pure domain logic.

use super::automod_engine::AutoModEngine;
use super::automod_models::{EvaluationOutcome, MessageRecord, ModerationLogEntry, SinkError};
use super::automod_settings::{AutoModSettings, SettingsError};
use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Persistence for per-guild auto-moderation settings.
#[async_trait]
pub trait AutoModStore: Send + Sync {
    /// `Ok(None)` when the guild has never been configured.
    async fn get_settings(&self, guild_id: u64) -> Result<Option<AutoModSettings>, SettingsError>;

    async fn save_settings(
        &self,
        guild_id: u64,
        settings: &AutoModSettings,
    ) -> Result<(), SettingsError>;

    /// Forget a guild entirely (the bot left it).
    async fn delete_settings(&self, guild_id: u64) -> Result<(), SettingsError>;
}

// ============================================================================
// PLATFORM TRAITS (PORTS)
// ============================================================================

/// Carries out moderation actions on the chat platform.
#[async_trait]
pub trait ModerationActionSink: Send + Sync {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), SinkError>;

    async fn mute_user(
        &self,
        guild_id: u64,
        user_id: u64,
        duration_secs: u64,
        reason: &str,
    ) -> Result<(), SinkError>;

    async fn kick_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), SinkError>;

    async fn ban_user(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), SinkError>;

    /// Callers ignore failures; closed DMs are normal.
    async fn notify_user_dm(&self, user_id: u64, text: &str) -> Result<(), SinkError>;

    /// Post a notice in a channel, optionally removing it again after `ttl`.
    async fn post_channel_notice(
        &self,
        channel_id: u64,
        text: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SinkError>;

    async fn post_log_embed(
        &self,
        log_channel_id: u64,
        entry: &ModerationLogEntry,
    ) -> Result<(), SinkError>;
}

/// The guild an invite points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteTarget {
    /// `None` for group DM invites
    pub guild_id: Option<u64>,
    pub guild_features: Vec<String>,
}

impl InviteTarget {
    pub fn is_partnered(&self) -> bool {
        self.guild_features
            .iter()
            .any(|f| f.eq_ignore_ascii_case("PARTNERED") || f.eq_ignore_ascii_case("VERIFIED"))
    }
}

/// Looks up where an invite code leads.
#[async_trait]
pub trait InviteResolver: Send + Sync {
    /// `Ok(None)` for unknown or expired codes.
    async fn resolve_invite(&self, code: &str) -> Result<Option<InviteTarget>, SinkError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Settings management plus message processing for every guild.
pub struct AutoModService<S: AutoModStore> {
    store: S,
    engine: AutoModEngine,
}

impl<S: AutoModStore> AutoModService<S> {
    pub fn new(store: S, engine: AutoModEngine) -> Self {
        Self { store, engine }
    }

    /// Settings for a guild; an unconfigured guild gets the defaults.
    pub async fn get_settings(&self, guild_id: u64) -> Result<AutoModSettings, SettingsError> {
        Ok(self.store.get_settings(guild_id).await?.unwrap_or_default())
    }

    /// Normalize, validate and persist. Returns what was stored.
    pub async fn save_settings(
        &self,
        guild_id: u64,
        settings: AutoModSettings,
    ) -> Result<AutoModSettings, SettingsError> {
        let settings = settings.normalized();
        settings.validate()?;
        self.store.save_settings(guild_id, &settings).await?;
        tracing::info!(guild_id, enabled = settings.enabled, "Auto-moderation settings saved");
        Ok(settings)
    }

    /// Load, modify and save in one step.
    pub async fn update_settings<F>(
        &self,
        guild_id: u64,
        change: F,
    ) -> Result<AutoModSettings, SettingsError>
    where
        F: FnOnce(&mut AutoModSettings) + Send,
    {
        let mut settings = self.get_settings(guild_id).await?;
        change(&mut settings);
        self.save_settings(guild_id, settings).await
    }

    pub async fn set_enabled(&self, guild_id: u64, enabled: bool) -> Result<(), SettingsError> {
        self.update_settings(guild_id, |s| s.enabled = enabled)
            .await
            .map(|_| ())
    }

    pub async fn remove_guild(&self, guild_id: u64) -> Result<(), SettingsError> {
        self.store.delete_settings(guild_id).await
    }

    /// Run one inbound message through auto-moderation.
    ///
    /// Never fails: a missing, unreadable or invalid configuration means
    /// auto-moderation is off for that guild.
    pub async fn process_message<K, R>(
        &self,
        message: &MessageRecord,
        sink: &K,
        invites: &R,
    ) -> EvaluationOutcome
    where
        K: ModerationActionSink + ?Sized,
        R: InviteResolver + ?Sized,
    {
        let settings = match self.store.get_settings(message.guild_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => return EvaluationOutcome::clean(),
            Err(e) => {
                tracing::error!(
                    guild_id = message.guild_id,
                    "Failed to load auto-moderation settings: {}",
                    e
                );
                return EvaluationOutcome::clean();
            }
        };

        if let Err(e) = settings.validate() {
            tracing::warn!(
                guild_id = message.guild_id,
                "Stored auto-moderation settings are invalid, skipping: {}",
                e
            );
            return EvaluationOutcome::clean();
        }

        self.engine.evaluate(message, &settings, sink, invites).await
    }

    pub async fn get_user_warnings(&self, guild_id: u64, user_id: u64) -> u32 {
        self.engine.warning_count(guild_id, user_id).await
    }

    /// Clear warnings for a user (admin action).
    pub async fn clear_user_warnings(&self, guild_id: u64, user_id: u64) {
        self.engine.clear_warnings(guild_id, user_id).await
    }

    /// Evict idle per-user state (called periodically).
    pub fn prune_idle_state(&self) -> usize {
        self.engine.prune_idle(chrono::Utc::now())
    }
}

// ============================================================================
// TESTS
// ============================================================================

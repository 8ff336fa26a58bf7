// This is the entry point of the Guard-shin auto-moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{AutoModEngine, AutoModService, EngineOptions, StateLimits};
use crate::discord::moderation::automod_handler;
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteAutoModStore;
use poise::serenity_prelude as serenity;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often idle per-user state is swept.
const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Process-level settings read from the environment.
struct Config {
    token: String,
    data_dir: PathBuf,
    action_timeout: Duration,
    state_ttl: Duration,
    state_max_entries: usize,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("DISCORD_TOKEN").map_err(|_| {
            anyhow::anyhow!(
                "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token."
            )
        })?;

        Ok(Self {
            token,
            data_dir: std::env::var("AUTOMOD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            action_timeout: Duration::from_secs(env_or("AUTOMOD_ACTION_TIMEOUT_SECS", 10)?),
            state_ttl: Duration::from_secs(env_or("AUTOMOD_STATE_TTL_SECS", 3600)?),
            state_max_entries: env_or("AUTOMOD_STATE_MAX_ENTRIES", 50_000)?,
        })
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            automod_handler::handle_message(ctx, new_message, data).await;
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            // `unavailable` means an outage, not that we were removed
            if !incomplete.unavailable {
                let guild_id = incomplete.id.get();
                match data.automod.remove_guild(guild_id).await {
                    Ok(()) => tracing::info!(guild_id, "Removed auto-moderation settings"),
                    Err(e) => tracing::error!(
                        guild_id,
                        "Failed to remove auto-moderation settings: {}",
                        e
                    ),
                }
            }
        }
        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let store = SqliteAutoModStore::open(config.data_dir.join("automod.db")).await?;

    let engine = AutoModEngine::new(EngineOptions {
        action_timeout: config.action_timeout,
        state_limits: StateLimits {
            idle_ttl: chrono::Duration::from_std(config.state_ttl)?,
            max_entries: config.state_max_entries,
        },
        ..Default::default()
    })?;

    let data = Data {
        automod: Arc::new(AutoModService::new(store, engine)),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS; // Member cache for permission checks

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                // Background sweep of idle per-user state
                let automod = Arc::clone(&data.automod);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        let removed = automod.prune_idle_state();
                        tracing::debug!(removed, "Auto-moderation state sweep finished");
                    }
                });

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await?;

    tracing::info!("Connecting to Discord");
    client.start().await?;
    Ok(())
}

// Core moderation module - auto-moderation business logic.
//
// models -> settings -> rules/state -> engine -> service, each layer only
// looking down.

pub mod automod_engine;
pub mod automod_models;
pub mod automod_rules;
pub mod automod_service;
pub mod automod_settings;
pub mod automod_state;

pub use automod_engine::{AutoModEngine, EngineOptions};
pub use automod_models::*;
pub use automod_service::*;
pub use automod_settings::*;
pub use automod_state::StateLimits;

// Discord side of auto-moderation.

pub mod action_sink;
pub mod automod_handler;
pub mod commands;
pub mod formatter;

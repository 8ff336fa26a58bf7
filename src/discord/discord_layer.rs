// Discord layer - commands and event handlers.

use crate::core::moderation::AutoModService;
use crate::infra::moderation::SqliteAutoModStore;
use std::sync::Arc;

#[path = "moderation/mod.rs"]
pub mod moderation;

/// Shared state handed to every command and event.
pub struct Data {
    pub automod: Arc<AutoModService<SqliteAutoModStore>>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

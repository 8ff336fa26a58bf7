// Auto-moderation storage implementations.

pub mod sqlite_automod_store;

pub use sqlite_automod_store::SqliteAutoModStore;

// SQLite-backed store for per-guild auto-moderation settings.
//
// Tables:
// - automod_settings: one row per guild, settings serialized as JSON
//
// Storing JSON keeps older rows loadable: every settings record carries
// `#[serde(default)]`, so fields added later fall back to their defaults.

use crate::core::moderation::{AutoModSettings, AutoModStore, SettingsError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteAutoModStore {
    pool: Pool<Sqlite>,
}

impl SqliteAutoModStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), SettingsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automod_settings (
                guild_id INTEGER PRIMARY KEY,
                settings TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SettingsError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl AutoModStore for SqliteAutoModStore {
    async fn get_settings(&self, guild_id: u64) -> Result<Option<AutoModSettings>, SettingsError> {
        let row = sqlx::query("SELECT settings FROM automod_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SettingsError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.get("settings");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SettingsError::Storage(format!("corrupt settings row: {}", e)))
    }

    async fn save_settings(
        &self,
        guild_id: u64,
        settings: &AutoModSettings,
    ) -> Result<(), SettingsError> {
        let raw =
            serde_json::to_string(settings).map_err(|e| SettingsError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO automod_settings (guild_id, settings, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                settings = excluded.settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(guild_id as i64)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SettingsError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_settings(&self, guild_id: u64) -> Result<(), SettingsError> {
        sqlx::query("DELETE FROM automod_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| SettingsError::Storage(e.to_string()))?;
        Ok(())
    }
}

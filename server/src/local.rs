// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use anyhow::{Context, Result};
use chrono::Utc;
use common::{Settings, Task};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

/// Slot holding the JSON-serialized task collection.
pub const TASKS_SLOT: &str = "tasks";
/// Slot holding the JSON-serialized settings.
pub const SETTINGS_SLOT: &str = "settings";
/// Slot holding remote writes that have not reached the backend yet.
pub const OUTBOX_SLOT: &str = "outbox";

const CREATE_SLOTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_slots (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );
"#;

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    value: String,
}

/// Durable string-keyed slots backed by SQLite.
///
/// Values are stored exactly as written; there is no schema versioning.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Opens (creating if needed) the database at `database_url`.
    pub async fn open(database_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("Creating database {}", database_url);
            Sqlite::create_database(database_url)
                .await
                .context("Failed to create database")?;
        } else {
            info!("Database already exists.");
        }

        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Self::from_pool(pool).await
    }

    /// A private in-memory store; its contents vanish with the value.
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never recycles, since every new
        // connection to `sqlite::memory:` is a fresh empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_SLOTS_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create 'kv_slots' table")?;
        info!("'kv_slots' table is ready.");
        Ok(Self { pool })
    }

    pub async fn get_slot(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, SlotRow>("SELECT value FROM kv_slots WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read slot '{key}'"))?;
        Ok(row.map(|row| row.value))
    }

    pub async fn put_slot(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_slots (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write slot '{key}'"))?;
        debug!("Wrote {} bytes to slot '{}'.", value.len(), key);
        Ok(())
    }

    /// Returns true if the slot existed.
    pub async fn remove_slot(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_slots WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove slot '{key}'"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Reads and parses a JSON slot. `what` names the value in errors.
    pub async fn load_json<T: DeserializeOwned>(&self, key: &str, what: &str) -> Result<Option<T>> {
        match self.get_slot(key).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse the stored {what}"))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, what: &str) -> Result<()> {
        let raw = serde_json::to_string(value).with_context(|| format!("Failed to serialize {what}"))?;
        self.put_slot(key, &raw).await
    }

    pub async fn load_tasks(&self) -> Result<Option<Vec<Task>>> {
        self.load_json(TASKS_SLOT, "task list").await
    }

    pub async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.save_json(TASKS_SLOT, tasks, "tasks").await
    }

    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        self.load_json(SETTINGS_SLOT, "settings").await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.save_json(SETTINGS_SLOT, settings, "settings").await
    }

    /// Drops every slot this store writes.
    pub async fn clear(&self) -> Result<()> {
        for key in [TASKS_SLOT, SETTINGS_SLOT, OUTBOX_SLOT] {
            self.remove_slot(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl LocalStore {
    /// Drops the slots table so every later call fails.
    pub(crate) async fn break_storage(&self) {
        sqlx::query("DROP TABLE kv_slots")
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

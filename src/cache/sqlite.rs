//! SQLite-backed cache tier
//!
//! A storage-backed tier suitable for the medium/slow positions: entries
//! survive restarts and a file-backed database can be shared by processes on
//! the same host. Expiry is enforced at read time via an `expires_at`
//! column; `sqlx` keeps all operations non-blocking.
//!
//! Anything speaking the get/set/delete-with-TTL contract can replace this
//! tier (a Redis- or memcached-backed implementation plugs in the same way);
//! this one ships with the crate because it needs no external service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::error::Result;

use super::CacheTier;

/// A [`CacheTier`] implementation that uses SQLite for durable storage.
pub struct SqliteTier {
    name: String,
    pool: Pool<Sqlite>,
}

impl SqliteTier {
    /// Open (or create) a file-backed tier.
    pub async fn new(name: impl Into<String>, db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self {
            name: name.into(),
            pool,
        })
    }

    /// In-memory tier, useful for tests. Pinned to a single connection so
    /// every operation sees the same database.
    pub async fn new_in_memory(name: impl Into<String>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self {
            name: name.into(),
            pool,
        })
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_expiry
            ON cache_entries(expires_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Drop entries whose TTL has lapsed. Reads already filter these out;
    /// this reclaims the space.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheTier for SqliteTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value FROM cache_entries
            WHERE key = ? AND expires_at > ?
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

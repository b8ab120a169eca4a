//! SQLite-backed token store using sqlx.
//!
//! Schema: `kv(key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at INTEGER)`.
//! The two tokens live under the fixed keys [`ACCESS_TOKEN_KEY`] and
//! [`REFRESH_TOKEN_KEY`]; writes and deletes of the pair run in a single
//! transaction.

use async_trait::async_trait;
use labdesk_types::{
    TokenPair, TokenStore,
    traits::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, Result},
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

/// A persistent [`TokenStore`] backed by `SQLite`.
pub struct SqliteTokenStore {
    /// Connection pool to the `SQLite` database.
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Connects to a `SQLite` database (e.g. `"sqlite:./session.db"` or `"sqlite::memory:"`).
    ///
    /// Automatically creates the database file if it does not exist and
    /// creates the schema.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the connection or table creation fails.
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection that is never recycled: an in-memory database lives
        // and dies with its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Opens (creating parent directories as needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the directory cannot be created or the
    /// database cannot be opened.
    pub async fn open(path: &std::path::Path) -> std::result::Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key         TEXT    PRIMARY KEY,
                value       TEXT    NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT (unixepoch())
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY).await
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY).await
    }

    async fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [
            (ACCESS_TOKEN_KEY, &pair.access_token),
            (REFRESH_TOKEN_KEY, &pair.refresh_token),
        ] {
            sqlx::query(
                "INSERT INTO kv (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = unixepoch()",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::debug!("token pair persisted");
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key IN (?, ?)")
            .bind(ACCESS_TOKEN_KEY)
            .bind(REFRESH_TOKEN_KEY)
            .execute(&self.pool)
            .await?;
        tracing::debug!("token pair cleared");
        Ok(())
    }
}

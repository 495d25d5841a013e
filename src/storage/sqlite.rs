use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::kv::{KvStore, StoreError};

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// SQLite-backed [`KvStore`]; survives restarts of the process.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the cache database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process holds the database,
    /// `StoreError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == MEMORY_PATH;

        #[cfg(unix)]
        if !in_memory {
            restrict_permissions(path);
        }

        let url = format!("sqlite:{path}?mode=rwc");
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // Every in-memory connection is its own database, so pin a single one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path, "Feed cache database ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Database(e) => StoreError::Migration(e.to_string()),
            other => other,
        })?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM feed_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_value(&self, key: &str, value: String) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feed_cache (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM feed_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

impl KvStore for SqliteStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        self.get_value(key).boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StoreError>> {
        self.set_value(key, value).boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.delete_value(key).boxed()
    }
}

/// Cached feeds reveal what the user reads; keep the file owner-only.
#[cfg(unix)]
fn restrict_permissions(path: &str) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let db_path = std::path::Path::new(path);
    if db_path.exists() {
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(db_path, perms) {
            tracing::warn!(path = %path, error = %e, "Failed to restrict cache database permissions");
        }
    } else if db_path.parent().is_some_and(|p| p.as_os_str().is_empty() || p.exists()) {
        // Create with mode 0600 up front; if this fails SQLite reports the error at connect
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(db_path);
    }
}

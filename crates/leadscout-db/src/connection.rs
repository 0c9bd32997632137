//! Database connection management.
//!
//! Provides a `ConnectionPool` wrapper around `SQLx` that opens (or creates)
//! the lead database and configures `SQLite` for concurrent job writers.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// `SQLite` connection pool for the lead database.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: Pool<Sqlite>,
}

impl ConnectionPool {
    /// Open a connection pool.
    ///
    /// # Arguments
    /// * `path` - Path to the `SQLite` database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the path is not UTF-8, the parent
    /// directory cannot be created, or the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;
        let in_memory = path_str == ":memory:";

        if !in_memory {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut connect_options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives only as long as its single connection.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to open {path_str}: {e}")))?;

        tracing::info!("Database pool created at {}", path_str);

        Ok(Self { pool })
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool() {
        let pool = ConnectionPool::new(":memory:").await.expect("create pool");
        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(pool.pool())
            .await
            .expect("select 1");
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_dir() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let path = tmp.path().join("nested").join("leads.db");
        let pool = ConnectionPool::new(&path).await.expect("create pool");
        assert!(path.exists());
        pool.close().await;
    }
}

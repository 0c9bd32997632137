//! LeadScout Database Layer
//!
//! Provides `SQLite` storage for canonical leads, job records and resumable
//! job checkpoints, plus CSV/JSON export of stored leads.
//! Uses `SQLx` with embedded migrations.
//!
//! # Architecture
//!
//! - **Leads**: [`LeadStore`] is the storage boundary; `put` is idempotent per identity key
//! - **Checkpoints**: [`CheckpointStore`] persists opaque job state keyed by job id
//! - **Jobs**: [`scan_jobs`] records per-job status and counters
//! - **Export**: [`LeadExporter`] writes timestamped CSV or JSON files
//!
//! In-memory and file-backed implementations of the storage traits live in
//! [`memory`] and [`checkpoints`] for tests and database-less runs.
//!
//! # Example
//!
//! ```ignore
//! use leadscout_db::{Database, LeadFilter, LeadStore};
//!
//! let db = Database::new("leads.db").await?;
//! db.run_migrations().await?;
//! let leads = db.query(&LeadFilter::default()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod checkpoints;
pub mod connection;
pub mod error;
pub mod export;
pub mod leads;
pub mod memory;
pub mod migrations;
/// Job records for tracking discovery runs.
pub mod scan_jobs;

// Re-export commonly used types
pub use checkpoints::{CheckpointStore, FileCheckpointStore};
pub use connection::ConnectionPool;
pub use error::{DatabaseError, Result};
pub use export::{ExportFormat, LeadExporter};
pub use leads::{LeadFilter, LeadStats, LeadStore, PutOutcome};
pub use memory::{MemoryCheckpointStore, MemoryLeadStore};
pub use scan_jobs::{ScanJob, ScanJobCounters, ScanJobStatus};

use std::path::Path;

/// High-level database interface with migrations.
///
/// Wraps a [`ConnectionPool`] and implements [`LeadStore`] and
/// [`CheckpointStore`] on top of it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open (or create) a database.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = ConnectionPool::new(path).await?;
        Ok(Self { pool })
    }

    /// Open a database and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create a database instance from an existing pool.
    #[must_use]
    pub fn from_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    ///
    /// Returns the number of applied migrations.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

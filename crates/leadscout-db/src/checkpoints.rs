//! Durable job checkpoints.
//!
//! A checkpoint is an opaque payload keyed by job id. The scanner decides
//! what goes into it; stores only guarantee that the last `save` for a job is
//! what `load` returns.

use crate::error::{DatabaseError, Result};
use crate::Database;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Persistence for resumable job state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the checkpoint for `job_id`.
    async fn save(&self, job_id: &str, payload: &str) -> Result<()>;

    /// The last saved checkpoint for `job_id`, if any.
    async fn load(&self, job_id: &str) -> Result<Option<String>>;

    /// Remove the checkpoint for `job_id`. Returns whether one existed.
    async fn delete(&self, job_id: &str) -> Result<bool>;

    /// Job ids that have a checkpoint, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl CheckpointStore for Database {
    async fn save(&self, job_id: &str, payload: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_checkpoints (job_id, payload, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO UPDATE SET payload = excluded.payload,
                                               updated_at = excluded.updated_at",
        )
        .bind(job_id)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<String>> {
        let payload = sqlx::query_scalar("SELECT payload FROM job_checkpoints WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(payload)
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_checkpoints WHERE job_id = ?")
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT job_id FROM job_checkpoints ORDER BY job_id")
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }
}

/// Checkpoints stored as `<job_id>.json` files in one directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir` for checkpoint files, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DatabaseError::InvalidId(format!(
                "checkpoint id '{job_id}'"
            )));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, job_id: &str, payload: &str) -> Result<()> {
        let path = self.path_for(job_id)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<String>> {
        let path = self.path_for(job_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let path = self.path_for(job_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

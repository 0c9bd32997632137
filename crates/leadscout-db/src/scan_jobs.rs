//! Records of discovery jobs and their running counters.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadscout_core::Query;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// A discovery job as recorded in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    /// Unique identifier for the job
    pub id: String,
    /// Query the job is running
    pub query: Query,
    /// Current status
    pub status: ScanJobStatus,
    /// When the job started
    pub started_at: DateTime<Utc>,
    /// When the job finished (if finished)
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest counters
    pub counters: ScanJobCounters,
    /// Error message if the job failed
    pub error_message: Option<String>,
}

/// Running counters of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJobCounters {
    /// Number of (source, tile) units in the job
    pub units_total: u64,
    /// Units that reached a terminal state
    pub units_processed: u64,
    /// Candidates received from sources
    pub total_found: u64,
    /// Canonical leads produced
    pub inserted: u64,
    /// Candidates merged into an existing lead
    pub skipped_duplicates: u64,
    /// Units that failed permanently
    pub failed_units: u64,
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanJobStatus {
    /// Job is currently running
    Running,
    /// Job completed
    Completed,
    /// Job failed with an error
    Failed,
    /// Job was cancelled by the user
    Cancelled,
}

impl ScanJobStatus {
    /// Whether the job will make no further progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ScanJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for ScanJobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(DatabaseError::Decode(format!("unknown job status '{other}'"))),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Record a new running job.
///
/// # Errors
/// Returns an error if the id already exists or the database operation fails.
pub async fn create_scan_job(
    pool: &SqlitePool,
    id: &str,
    query: &Query,
    units_total: u64,
) -> Result<ScanJob> {
    let started_at = Utc::now();
    let status = ScanJobStatus::Running;

    sqlx::query(
        "INSERT INTO scan_jobs (id, query, status, started_at, units_total)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(serde_json::to_string(query)?)
    .bind(status.to_string())
    .bind(started_at.to_rfc3339())
    .bind(to_i64(units_total))
    .execute(pool)
    .await?;

    Ok(ScanJob {
        id: id.to_string(),
        query: query.clone(),
        status,
        started_at,
        completed_at: None,
        counters: ScanJobCounters {
            units_total,
            ..ScanJobCounters::default()
        },
        error_message: None,
    })
}

/// Store the latest counters of a job.
pub async fn update_progress(pool: &SqlitePool, id: &str, counters: &ScanJobCounters) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET units_total = ?, units_processed = ?, total_found = ?, inserted = ?,
                              skipped_duplicates = ?, failed_units = ?
         WHERE id = ?",
    )
    .bind(to_i64(counters.units_total))
    .bind(to_i64(counters.units_processed))
    .bind(to_i64(counters.total_found))
    .bind(to_i64(counters.inserted))
    .bind(to_i64(counters.skipped_duplicates))
    .bind(to_i64(counters.failed_units))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan job '{id}' not found"
        )));
    }
    Ok(())
}

/// Mark a job finished with a terminal status.
pub async fn finish_scan_job(
    pool: &SqlitePool,
    id: &str,
    status: ScanJobStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
    )
    .bind(status.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan job '{id}' not found"
        )));
    }
    Ok(())
}

/// Set a finished job back to running, for resume.
pub async fn reopen_scan_job(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET status = ?, completed_at = NULL, error_message = NULL WHERE id = ?",
    )
    .bind(ScanJobStatus::Running.to_string())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scan job '{id}' not found"
        )));
    }
    Ok(())
}

/// Fetch one job.
pub async fn get_scan_job(pool: &SqlitePool, id: &str) -> Result<Option<ScanJob>> {
    let row = sqlx::query("SELECT * FROM scan_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Most recent jobs first.
pub async fn list_scan_jobs(pool: &SqlitePool, limit: u32) -> Result<Vec<ScanJob>> {
    let rows = sqlx::query("SELECT * FROM scan_jobs ORDER BY started_at DESC LIMIT ?")
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScanJob> {
    let count = |column: &str| -> Result<u64> {
        let value: i64 = row.try_get(column)?;
        Ok(value.unsigned_abs())
    };

    let query: String = row.try_get("query")?;
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(ScanJob {
        id: row.try_get("id")?,
        query: serde_json::from_str(&query)?,
        status: status.parse()?,
        started_at: parse_time(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
        counters: ScanJobCounters {
            units_total: count("units_total")?,
            units_processed: count("units_processed")?,
            total_found: count("total_found")?,
            inserted: count("inserted")?,
            skipped_duplicates: count("skipped_duplicates")?,
            failed_units: count("failed_units")?,
        },
        error_message: row.try_get("error_message")?,
    })
}

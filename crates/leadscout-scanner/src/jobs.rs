//! Job control surface.
//!
//! [`JobManager`] runs orchestrator jobs as background tasks and lets a
//! caller follow and steer them by id: status, challenge resolution,
//! cancellation, and waiting for the result. When a database is attached,
//! every job also gets a `scan_jobs` record.

use crate::challenge::PendingChallenge;
use crate::error::{Result, ScanError};
use crate::orchestrator::{JobControl, JobProgress, JobResult, Orchestrator, PreparedJob};
use leadscout_core::Query;
use leadscout_db::{scan_jobs, Database, ScanJobCounters, ScanJobStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type JobOutcome = std::result::Result<JobResult, String>;

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    /// Units are being worked
    Running,
    /// Running, with at least one unit waiting on a challenge
    Suspended,
    /// Finished without being cancelled
    Completed,
    /// Stopped from outside; resumable from its checkpoint
    Cancelled,
    /// Ended with an error
    Failed(String),
}

/// Snapshot of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Job id
    pub job_id: String,
    /// Lifecycle state
    pub state: JobState,
    /// Latest progress
    pub progress: JobProgress,
    /// Challenges waiting for resolution
    pub pending_challenges: Vec<PendingChallenge>,
    /// Final result once the job has finished
    pub result: Option<JobResult>,
}

struct JobEntry {
    control: JobControl,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

impl JobEntry {
    fn is_running(&self) -> bool {
        self.outcome.borrow().is_none()
    }
}

/// Runs jobs in the background and tracks them by id.
pub struct JobManager {
    orchestrator: Arc<Orchestrator>,
    database: Option<Database>,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &self.job_ids())
            .finish_non_exhaustive()
    }
}

impl JobManager {
    /// Create a manager for `orchestrator`.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            database: None,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Record jobs in `database`.
    #[must_use]
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().expect("job table lock")
    }

    /// Ids of every job started by this manager.
    #[must_use]
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate `query` and start it in the background.
    ///
    /// An invalid query is rejected here, before any work starts.
    pub async fn start(&self, query: Query) -> Result<String> {
        let job = self.orchestrator.prepare(query)?;
        if let Some(db) = &self.database {
            let units = job.plan().units.len() as u64;
            if let Err(e) =
                scan_jobs::create_scan_job(db.pool(), job.job_id(), job.query(), units)
                    .await
            {
                tracing::warn!(job_id = %job.job_id(), error = %e, "failed to record scan job");
            }
        }
        Ok(self.spawn(job))
    }

    /// Continue a cancelled or interrupted job from its checkpoint.
    pub async fn resume(&self, job_id: &str) -> Result<String> {
        if self.jobs().get(job_id).is_some_and(JobEntry::is_running) {
            return Err(ScanError::JobRunning(job_id.to_string()));
        }

        let job = self.orchestrator.prepare_resume(job_id).await?;
        if let Some(db) = &self.database {
            let recorded = match scan_jobs::get_scan_job(db.pool(), job_id).await {
                Ok(Some(_)) => scan_jobs::reopen_scan_job(db.pool(), job_id).await,
                Ok(None) => {
                    let units = job.plan().units.len() as u64;
                    scan_jobs::create_scan_job(db.pool(), job_id, job.query(), units)
                        .await
                        .map(|_| ())
                }
                Err(e) => Err(e),
            };
            if let Err(e) = recorded {
                tracing::warn!(job_id = %job_id, error = %e, "failed to record resumed scan job");
            }
        }
        Ok(self.spawn(job))
    }

    fn spawn(&self, job: PreparedJob) -> String {
        let job_id = job.job_id().to_string();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        self.jobs().insert(
            job_id.clone(),
            JobEntry {
                control: job.control().clone(),
                outcome: outcome_rx,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let database = self.database.clone();
        let task_id = job_id.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.execute(job).await.map_err(|e| {
                tracing::error!(job_id = %task_id, error = %e, "discovery job failed");
                e.to_string()
            });
            if let Some(db) = &database {
                record_outcome(db, &task_id, &outcome).await;
            }
            outcome_tx.send_replace(Some(outcome));
        });

        job_id
    }

    /// Current status of a job.
    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        let jobs = self.jobs();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| ScanError::JobNotFound(job_id.to_string()))?;

        let outcome = entry.outcome.borrow().clone();
        // Only a running or cancelled job has units left to resume.
        let pending_challenges = match &outcome {
            None | Some(Ok(JobResult { cancelled: true, .. })) => {
                entry.control.pending_challenges()
            }
            Some(_) => Vec::new(),
        };
        let (state, result) = match outcome {
            None if pending_challenges.is_empty() => (JobState::Running, None),
            None => (JobState::Suspended, None),
            Some(Ok(result)) if result.cancelled => (JobState::Cancelled, Some(result)),
            Some(Ok(result)) => (JobState::Completed, Some(result)),
            Some(Err(message)) => (JobState::Failed(message), None),
        };

        Ok(JobStatus {
            job_id: job_id.to_string(),
            state,
            progress: entry.control.progress(),
            pending_challenges,
            result,
        })
    }

    /// Signal that the challenges of a job are cleared; returns how many units resume.
    pub fn resolve_challenge(&self, job_id: &str) -> Result<usize> {
        let control = self.control(job_id)?;
        let resolved = control.resolve_challenges();
        tracing::info!(job_id = %job_id, resolved, "challenge resolution signaled");
        Ok(resolved)
    }

    /// Cancel a job. Its checkpoint is kept for [`JobManager::resume`].
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let control = self.control(job_id)?;
        control.cancel();
        tracing::info!(job_id = %job_id, "job cancellation requested");
        Ok(())
    }

    /// Stop tracking a finished job; returns `false` if it was unknown.
    ///
    /// Its checkpoint and `scan_jobs` record are left in place.
    pub fn forget(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs();
        match jobs.get(job_id) {
            None => Ok(false),
            Some(entry) if entry.is_running() => Err(ScanError::JobRunning(job_id.to_string())),
            Some(_) => {
                jobs.remove(job_id);
                tracing::debug!(job_id = %job_id, "forgot finished job");
                Ok(true)
            }
        }
    }

    /// Control handle of a job.
    pub fn control(&self, job_id: &str) -> Result<JobControl> {
        self.jobs()
            .get(job_id)
            .map(|entry| entry.control.clone())
            .ok_or_else(|| ScanError::JobNotFound(job_id.to_string()))
    }

    /// Wait for a job to finish.
    pub async fn wait(&self, job_id: &str) -> Result<JobResult> {
        let mut outcome = self
            .jobs()
            .get(job_id)
            .map(|entry| entry.outcome.clone())
            .ok_or_else(|| ScanError::JobNotFound(job_id.to_string()))?;

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ScanError::JobFailed(format!("job {job_id} ended without a result")))?
            .clone();
        match finished {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(ScanError::JobFailed(message)),
            None => Err(ScanError::JobFailed(format!("job {job_id} ended without a result"))),
        }
    }
}

async fn record_outcome(db: &Database, job_id: &str, outcome: &JobOutcome) {
    let recorded = match outcome {
        Ok(result) => {
            let counters = ScanJobCounters {
                units_total: result.units_total as u64,
                units_processed: (result.units_completed + result.failed_units.len()) as u64,
                total_found: result.total_found,
                inserted: result.inserted,
                skipped_duplicates: result.skipped_duplicates,
                failed_units: result.failed_units.len() as u64,
            };
            let status = if result.cancelled {
                ScanJobStatus::Cancelled
            } else {
                ScanJobStatus::Completed
            };
            match scan_jobs::update_progress(db.pool(), job_id, &counters).await {
                Ok(()) => scan_jobs::finish_scan_job(db.pool(), job_id, status, None).await,
                Err(e) => Err(e),
            }
        }
        Err(message) => {
            scan_jobs::finish_scan_job(db.pool(), job_id, ScanJobStatus::Failed, Some(message))
                .await
        }
    };
    if let Err(e) = recorded {
        tracing::warn!(job_id = %job_id, error = %e, "failed to record job outcome");
    }
}

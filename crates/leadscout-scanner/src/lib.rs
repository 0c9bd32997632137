//! LeadScout Scanner - Lead discovery orchestration.
//!
//! This crate drives discovery jobs across pluggable lead sources. It splits
//! large search areas into tiles, paces requests per source, honours
//! robots.txt, merges candidates from every source into canonical leads, and
//! survives anti-bot challenges and restarts through durable checkpoints.
//!
//! # Features
//!
//! - Per-source pacing with exponential backoff on transient failures
//! - Fail-closed robots.txt checks, fetched once per domain per job
//! - Deterministic row-major tiling of large regions
//! - Order-independent deduplication (contact, name and address, fuzzy name)
//! - Challenge suspension with external resolution and a timeout
//! - Checkpoint/resume that never re-emits a stored identity key
//!
//! # Example
//!
//! ```rust,ignore
//! use leadscout_scanner::{JobManager, Orchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = Orchestrator::new(registry, robots_fetcher, store, checkpoints, config);
//! let jobs = JobManager::new(Arc::new(orchestrator));
//!
//! let job_id = jobs.start(query).await?;
//! let result = jobs.wait(&job_id).await?;
//! println!("{} leads, {} duplicates", result.inserted, result.skipped_duplicates);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod challenge;
pub mod checkpoint;
pub mod dedup;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod rate_limit;
pub mod robots;
pub mod tiler;

// Re-export commonly used types
pub use challenge::{ChallengeHandler, ChallengeState, PendingChallenge, Resolution};
pub use checkpoint::JobCheckpoint;
pub use dedup::{DedupEngine, DedupStats, MergeOutcome};
pub use error::{FailureReason, Result, ScanError, UnitFailure};
pub use jobs::{JobManager, JobState, JobStatus};
pub use orchestrator::{JobControl, JobPlan, JobProgress, JobResult, Orchestrator, PreparedJob};
pub use rate_limit::{LimiterState, RateLimiter};
pub use robots::{RobotsDecision, RobotsGate};
pub use tiler::{split, Tiler};

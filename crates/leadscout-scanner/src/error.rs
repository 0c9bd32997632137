//! Scan error types.

use leadscout_core::UnitKey;
use leadscout_db::DatabaseError;
use leadscout_sources::SourceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the scanner.
///
/// Only [`ScanError::InvalidQuery`] rejects a job before work starts.
/// Failures scoped to one (source, tile) unit never surface as a `ScanError`;
/// they end that unit and are reported in the job result as a
/// [`FailureReason`].
#[derive(Debug, Error)]
pub enum ScanError {
    /// The query cannot be run (unknown source, bad limit, too many tiles)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A lead could not be written
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// Checkpoint could not be encoded or decoded
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// No job with this id is known
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job is still running
    #[error("job is already running: {0}")]
    JobRunning(String),

    /// The job task ended abnormally
    #[error("job failed: {0}")]
    JobFailed(String),

    /// Source layer error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Database layer error
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

/// Result type alias for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Why a unit was marked failed.
///
/// Transient fetch errors are retried under backoff and only show up here as
/// [`FailureReason::MaxRetriesExceeded`] once attempts run out. A challenge
/// suspends its unit rather than failing it, unless nobody resolves it in
/// time. An exhausted source ends its unit normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Robots rules forbid the request path
    RobotsDisallowed {
        /// Path that was refused
        path: String,
    },
    /// robots.txt could not be fetched or parsed; the domain is skipped
    RobotsUnavailable {
        /// What went wrong
        message: String,
    },
    /// Transient failures exhausted the retry budget
    MaxRetriesExceeded {
        /// Attempts made
        attempts: u32,
        /// Last failure seen
        last_error: String,
    },
    /// Nobody resolved the challenge in time
    ChallengeTimeout,
    /// A non-retryable fetch or extraction error
    Permanent {
        /// What went wrong
        message: String,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RobotsDisallowed { path } => write!(f, "robots.txt disallows {path}"),
            Self::RobotsUnavailable { message } => write!(f, "robots.txt unavailable: {message}"),
            Self::MaxRetriesExceeded {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            Self::ChallengeTimeout => write!(f, "challenge not resolved in time"),
            Self::Permanent { message } => f.write_str(message),
        }
    }
}

/// A unit that ended in failure, reported in the job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Failed unit
    pub unit: UnitKey,
    /// Why it failed
    pub reason: FailureReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_core::{SourceId, TileId};

    #[test]
    fn test_failure_reason_serializes_tagged() {
        let failure = UnitFailure {
            unit: UnitKey::new(
                SourceId::new("maps").expect("valid source id"),
                TileId::grid(0, 1),
            ),
            reason: FailureReason::MaxRetriesExceeded {
                attempts: 3,
                last_error: "HTTP 503".to_string(),
            },
        };

        let json = serde_json::to_string(&failure).expect("serialize");
        assert!(json.contains(r#""kind":"max_retries_exceeded""#));
        let back: UnitFailure = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, failure);
        assert_eq!(back.reason.to_string(), "gave up after 3 attempts: HTTP 503");
    }

    #[test]
    fn test_every_failure_kind_has_its_own_tag() {
        let reasons = [
            (
                FailureReason::RobotsDisallowed {
                    path: "/search".to_string(),
                },
                "robots_disallowed",
            ),
            (
                FailureReason::RobotsUnavailable {
                    message: "robots.txt returned HTTP 503".to_string(),
                },
                "robots_unavailable",
            ),
            (
                FailureReason::MaxRetriesExceeded {
                    attempts: 3,
                    last_error: "connection reset".to_string(),
                },
                "max_retries_exceeded",
            ),
            (FailureReason::ChallengeTimeout, "challenge_timeout"),
            (
                FailureReason::Permanent {
                    message: "HTTP 404 from https://maps.test/".to_string(),
                },
                "permanent",
            ),
        ];

        for (reason, tag) in reasons {
            let json = serde_json::to_value(&reason).expect("serialize");
            assert_eq!(json["kind"], tag);
            assert!(!reason.to_string().is_empty());
        }
    }
}

//! Anti-bot challenge tracking.
//!
//! Each unit moves through
//! `Normal -> ChallengeDetected -> Suspended -> ManualResolutionSignaled -> Normal`.
//! A suspended unit waits for an external resolve signal. Other units keep
//! running. If no signal arrives within the timeout, the unit is given up.

use chrono::{DateTime, Utc};
use leadscout_core::UnitKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Challenge state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    /// No challenge outstanding
    Normal,
    /// A challenge page was seen; the checkpoint is being written
    ChallengeDetected,
    /// Waiting for someone to clear the challenge
    Suspended,
    /// Resolution was signaled; the unit is about to continue
    ManualResolutionSignaled,
}

/// A blocking condition reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    /// Suspended unit
    pub unit: UnitKey,
    /// Page that served the challenge
    pub url: String,
    /// What the caller is expected to do
    pub message: String,
    /// When the challenge was seen
    pub detected_at: DateTime<Utc>,
}

/// How a wait for resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Someone signaled that the challenge is cleared
    Resolved,
    /// The resolution timeout elapsed
    TimedOut,
    /// The job was cancelled while waiting
    Cancelled,
}

struct UnitChallenge {
    state: ChallengeState,
    pending: Option<PendingChallenge>,
    wake: Arc<Notify>,
}

impl UnitChallenge {
    fn new() -> Self {
        Self {
            state: ChallengeState::Normal,
            pending: None,
            wake: Arc::new(Notify::new()),
        }
    }
}

/// Challenge state for every unit of one job.
pub struct ChallengeHandler {
    timeout: Duration,
    units: Mutex<HashMap<UnitKey, UnitChallenge>>,
}

impl std::fmt::Debug for ChallengeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeHandler")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending().len())
            .finish()
    }
}

impl ChallengeHandler {
    /// Create a handler whose suspended units give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            units: Mutex::new(HashMap::new()),
        }
    }

    /// How long a suspended unit waits.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UnitKey, UnitChallenge>> {
        self.units.lock().expect("challenge handler lock")
    }

    /// Record a challenge page for `unit`.
    pub fn detect(&self, unit: &UnitKey, url: &str) -> PendingChallenge {
        let pending = PendingChallenge {
            unit: unit.clone(),
            url: url.to_string(),
            message: format!(
                "{} served an anti-bot challenge; open {url} in a browser, solve it, then resume the job",
                unit.source
            ),
            detected_at: Utc::now(),
        };

        let mut units = self.lock();
        let entry = units.entry(unit.clone()).or_insert_with(UnitChallenge::new);
        entry.state = ChallengeState::ChallengeDetected;
        entry.pending = Some(pending.clone());
        drop(units);

        tracing::warn!(unit = %unit, url = %url, "challenge detected");
        pending
    }

    /// Mark a detected unit as waiting for resolution.
    pub fn suspend(&self, unit: &UnitKey) {
        if let Some(entry) = self.lock().get_mut(unit) {
            if entry.state == ChallengeState::ChallengeDetected {
                entry.state = ChallengeState::Suspended;
            }
        }
    }

    /// Current state of a unit.
    #[must_use]
    pub fn state(&self, unit: &UnitKey) -> ChallengeState {
        self.lock()
            .get(unit)
            .map_or(ChallengeState::Normal, |entry| entry.state)
    }

    /// Challenges still waiting for resolution, by unit.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingChallenge> {
        let mut pending: Vec<PendingChallenge> = self
            .lock()
            .values()
            .filter(|entry| {
                matches!(
                    entry.state,
                    ChallengeState::ChallengeDetected | ChallengeState::Suspended
                )
            })
            .filter_map(|entry| entry.pending.clone())
            .collect();
        pending.sort_by(|a, b| a.unit.cmp(&b.unit));
        pending
    }

    /// Signal that the challenge on `unit` is cleared.
    ///
    /// Returns `false` when the unit has no outstanding challenge.
    pub fn resolve(&self, unit: &UnitKey) -> bool {
        let mut units = self.lock();
        let Some(entry) = units.get_mut(unit) else {
            return false;
        };
        signal(unit, entry)
    }

    /// Signal every outstanding challenge; returns how many were signaled.
    pub fn resolve_all(&self) -> usize {
        let mut units = self.lock();
        let mut signaled = 0;
        for (unit, entry) in units.iter_mut() {
            if signal(unit, entry) {
                signaled += 1;
            }
        }
        signaled
    }

    /// Drop every outstanding challenge without resuming its unit.
    ///
    /// Used once a job has finished and nothing is left to resume.
    pub fn clear_all(&self) -> usize {
        let mut units = self.lock();
        let mut cleared = 0;
        for entry in units.values_mut() {
            if entry.state != ChallengeState::Normal {
                clear(entry);
                cleared += 1;
            }
        }
        cleared
    }

    /// Wait until `unit` is resolved, the timeout elapses, or `cancel` fires.
    ///
    /// On resolution or timeout the unit returns to `Normal`. On cancellation
    /// it stays suspended so the challenge is still reported.
    pub async fn await_resolution(&self, unit: &UnitKey, cancel: &CancellationToken) -> Resolution {
        let wake = {
            let mut units = self.lock();
            let entry = units.entry(unit.clone()).or_insert_with(UnitChallenge::new);
            if entry.state == ChallengeState::ManualResolutionSignaled {
                clear(entry);
                return Resolution::Resolved;
            }
            Arc::clone(&entry.wake)
        };

        let resolution = tokio::select! {
            () = wake.notified() => Resolution::Resolved,
            () = tokio::time::sleep(self.timeout) => Resolution::TimedOut,
            () = cancel.cancelled() => Resolution::Cancelled,
        };

        match resolution {
            Resolution::Resolved => {
                if let Some(entry) = self.lock().get_mut(unit) {
                    clear(entry);
                }
                tracing::info!(unit = %unit, "challenge resolved; resuming unit");
            }
            Resolution::TimedOut => {
                if let Some(entry) = self.lock().get_mut(unit) {
                    clear(entry);
                }
                tracing::warn!(
                    unit = %unit,
                    timeout = ?self.timeout,
                    "challenge not resolved in time; giving up on unit"
                );
            }
            Resolution::Cancelled => {}
        }
        resolution
    }
}

fn signal(unit: &UnitKey, entry: &mut UnitChallenge) -> bool {
    if !matches!(
        entry.state,
        ChallengeState::ChallengeDetected | ChallengeState::Suspended
    ) {
        return false;
    }
    entry.state = ChallengeState::ManualResolutionSignaled;
    // notify_one keeps a permit if the unit is not waiting yet.
    entry.wake.notify_one();
    tracing::debug!(unit = %unit, "challenge resolution signaled");
    true
}

fn clear(entry: &mut UnitChallenge) {
    entry.state = ChallengeState::Normal;
    entry.pending = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_core::{SourceId, TileId};

    fn unit(source: &str, tile: usize) -> UnitKey {
        UnitKey::new(
            SourceId::new(source).expect("valid source id"),
            TileId::grid(0, tile),
        )
    }

    #[test]
    fn test_detect_then_suspend_reports_pending() {
        let handler = ChallengeHandler::new(Duration::from_secs(60));
        let maps = unit("maps", 2);

        assert_eq!(handler.state(&maps), ChallengeState::Normal);
        let pending = handler.detect(&maps, "https://maps.test/sorry/index");
        assert_eq!(handler.state(&maps), ChallengeState::ChallengeDetected);
        assert!(pending.message.contains("https://maps.test/sorry/index"));

        handler.suspend(&maps);
        assert_eq!(handler.state(&maps), ChallengeState::Suspended);
        assert_eq!(handler.pending(), vec![pending]);
    }

    #[test]
    fn test_resolve_without_challenge_is_noop() {
        let handler = ChallengeHandler::new(Duration::from_secs(60));
        assert!(!handler.resolve(&unit("maps", 0)));
        assert_eq!(handler.resolve_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_wakes_waiting_unit() {
        let handler = Arc::new(ChallengeHandler::new(Duration::from_secs(60)));
        let maps = unit("maps", 2);
        handler.detect(&maps, "https://maps.test/");
        handler.suspend(&maps);

        let waiter = {
            let handler = Arc::clone(&handler);
            let maps = maps.clone();
            tokio::spawn(async move {
                handler
                    .await_resolution(&maps, &CancellationToken::new())
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert!(handler.resolve(&maps));
        assert_eq!(handler.state(&maps), ChallengeState::ManualResolutionSignaled);
        assert!(handler.pending().is_empty());

        let resolution = waiter.await.expect("waiter completes");
        assert_eq!(resolution, Resolution::Resolved);
        assert_eq!(handler.state(&maps), ChallengeState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_before_wait_is_not_lost() {
        let handler = ChallengeHandler::new(Duration::from_secs(60));
        let maps = unit("maps", 2);
        handler.detect(&maps, "https://maps.test/");
        handler.suspend(&maps);
        assert_eq!(handler.resolve_all(), 1);

        let resolution = handler
            .await_resolution(&maps, &CancellationToken::new())
            .await;
        assert_eq!(resolution, Resolution::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_challenge_times_out() {
        let handler = ChallengeHandler::new(Duration::from_secs(600));
        let maps = unit("maps", 2);
        handler.detect(&maps, "https://maps.test/");
        handler.suspend(&maps);

        let start = tokio::time::Instant::now();
        let resolution = handler
            .await_resolution(&maps, &CancellationToken::new())
            .await;
        assert_eq!(resolution, Resolution::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
        assert_eq!(handler.state(&maps), ChallengeState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_challenge_pending() {
        let handler = ChallengeHandler::new(Duration::from_secs(600));
        let maps = unit("maps", 2);
        handler.detect(&maps, "https://maps.test/");
        handler.suspend(&maps);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let resolution = handler.await_resolution(&maps, &cancel).await;

        assert_eq!(resolution, Resolution::Cancelled);
        assert_eq!(handler.state(&maps), ChallengeState::Suspended);
        assert_eq!(handler.pending().len(), 1);
    }
}

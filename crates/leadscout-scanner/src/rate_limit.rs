//! Per-source request pacing with exponential retry backoff.
//!
//! Every fetch passes through [`RateLimiter::acquire`]. Each source has its own
//! budget; concurrent units of the same source queue on that budget's lock,
//! so at most one of them is ever waiting out the delay.
//!
//! After `k` consecutive failures the delay before the next request is
//! `min(base * 2^k, cap)` (never less than the source's minimum delay). A
//! success resets `k` to 0.

use leadscout_core::{RateLimitConfig, SourceId};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Observable state of one source's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterState {
    /// A request may go out now
    Ready,
    /// Pacing delay since the last request has not elapsed
    Waiting,
    /// Backing off after this many consecutive failures
    Backoff(u32),
}

#[derive(Debug)]
struct RateBudget {
    min_delay: Duration,
    last_request_at: Option<Instant>,
    consecutive_failures: u32,
}

impl RateBudget {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Per-source pacing and backoff.
#[derive(Debug)]
pub struct RateLimiter {
    default_min_delay: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
    jitter_ms: u64,
    budgets: Mutex<HashMap<SourceId, Arc<tokio::sync::Mutex<RateBudget>>>>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            default_min_delay: Duration::from_millis(config.min_delay_ms),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
            jitter_ms: config.jitter_ms,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    fn budget(&self, source: &SourceId) -> Arc<tokio::sync::Mutex<RateBudget>> {
        let mut budgets = self.budgets.lock().expect("rate limiter lock");
        Arc::clone(budgets.entry(source.clone()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(RateBudget::new(
                self.default_min_delay,
            )))
        }))
    }

    /// Backoff delay after `failures` consecutive failures.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }

    fn delay_for(&self, budget: &RateBudget) -> Duration {
        if budget.consecutive_failures > 0 {
            return self
                .backoff_delay(budget.consecutive_failures)
                .max(budget.min_delay);
        }
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        budget.min_delay + jitter
    }

    /// Wait until `source` may send its next request, then claim the slot.
    ///
    /// Cancel-safe: dropping the future before it completes claims nothing.
    pub async fn acquire(&self, source: &SourceId) {
        let budget = self.budget(source);
        let mut budget = budget.lock().await;

        if let Some(last) = budget.last_request_at {
            let delay = self.delay_for(&budget);
            let ready_at = last + delay;
            if Instant::now() < ready_at {
                tracing::trace!(source = %source, ?delay, "waiting for rate budget");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        budget.last_request_at = Some(Instant::now());
    }

    /// Record a successful request; resets the failure count.
    pub async fn record_success(&self, source: &SourceId) {
        let budget = self.budget(source);
        budget.lock().await.consecutive_failures = 0;
    }

    /// Record a transient failure and return the delay before the next attempt.
    pub async fn record_failure(&self, source: &SourceId) -> Duration {
        let budget = self.budget(source);
        let mut budget = budget.lock().await;
        budget.consecutive_failures = budget.consecutive_failures.saturating_add(1);
        self.backoff_delay(budget.consecutive_failures)
            .max(budget.min_delay)
    }

    /// Override the minimum delay for one source.
    pub async fn set_min_delay(&self, source: &SourceId, min_delay: Duration) {
        let budget = self.budget(source);
        budget.lock().await.min_delay = min_delay;
    }

    /// Raise the minimum delay for one source; a lower value is ignored.
    pub async fn raise_min_delay(&self, source: &SourceId, min_delay: Duration) {
        let budget = self.budget(source);
        let mut budget = budget.lock().await;
        if min_delay > budget.min_delay {
            tracing::debug!(source = %source, ?min_delay, "raising minimum delay");
            budget.min_delay = min_delay;
        }
    }

    /// Current minimum delay for a source.
    pub async fn min_delay(&self, source: &SourceId) -> Duration {
        self.budget(source).lock().await.min_delay
    }

    /// Consecutive failures recorded for a source.
    pub async fn consecutive_failures(&self, source: &SourceId) -> u32 {
        self.budget(source).lock().await.consecutive_failures
    }

    /// Current state of a source's budget.
    ///
    /// Reports `Waiting` while another unit holds the budget.
    #[must_use]
    pub fn state(&self, source: &SourceId) -> LimiterState {
        let budget = self.budget(source);
        let Ok(guard) = budget.try_lock() else {
            return LimiterState::Waiting;
        };

        if guard.consecutive_failures > 0 {
            return LimiterState::Backoff(guard.consecutive_failures);
        }
        match guard.last_request_at {
            Some(last) if Instant::now() < last + guard.min_delay => LimiterState::Waiting,
            _ => LimiterState::Ready,
        }
    }
}

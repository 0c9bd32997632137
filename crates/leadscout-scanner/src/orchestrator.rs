//! Lead discovery orchestrator.
//!
//! A job is the cross product of tiles and requested sources. Each
//! (source, tile) unit walks its source's result pages. Every page request
//! goes through the robots gate and then the rate limiter, with retries under
//! backoff. Units run concurrently up to `scanning.concurrent_units`; a unit
//! suspended on a challenge gives its slot back while it waits.
//!
//! Units never touch the dedup engine or storage. They send their pages to a
//! single consumer, which merges candidates as they arrive, writes canonical
//! leads to the store, keeps the checkpoint current and stops the remaining
//! units once the lead limit is reached.

use crate::challenge::{ChallengeHandler, PendingChallenge, Resolution};
use crate::checkpoint::JobCheckpoint;
use crate::dedup::{DedupEngine, MergeOutcome};
use crate::error::{FailureReason, Result, ScanError, UnitFailure};
use crate::rate_limit::RateLimiter;
use crate::robots::{RobotsDecision, RobotsGate};
use crate::tiler::Tiler;
use futures::stream::{FuturesUnordered, StreamExt};
use leadscout_core::{AppConfig, LeadCandidate, Query, Tile, TileId, TilingConfig, UnitKey};
use leadscout_db::{CheckpointStore, DatabaseError, LeadStore, PutOutcome};
use leadscout_sources::{Cursor, Discovery, FetchResponse, PageFetcher, SourceRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Pages buffered between units and the consumer.
const EVENT_BUFFER: usize = 32;

/// Incremental progress of a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    /// Units planned for the job
    pub units_total: usize,
    /// Units that completed or failed
    pub units_processed: usize,
    /// Canonical leads so far
    pub leads_found: usize,
    /// Candidates produced so far
    pub candidates_seen: u64,
}

/// Outcome of a job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job that produced this result
    pub job_id: String,
    /// Candidates produced by all units
    pub total_found: u64,
    /// Canonical leads handed to storage
    pub inserted: u64,
    /// Candidates (and leads) merged into another lead
    pub skipped_duplicates: u64,
    /// Candidates refused because the lead limit was reached
    pub dropped_over_limit: u64,
    /// Units that ended in failure, with the reason
    pub failed_units: Vec<UnitFailure>,
    /// Lead writes that failed; leads already stored stay stored
    pub storage_errors: Vec<String>,
    /// Units planned for the job
    pub units_total: usize,
    /// Units whose candidate sequence ended normally
    pub units_completed: usize,
    /// Whether the job was cancelled from outside
    pub cancelled: bool,
    /// Whether the lead limit stopped the job
    pub limit_reached: bool,
    /// Wall time of this run
    pub duration: Duration,
}

/// Tiles and units for a query.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// Tiles in row-major order
    pub tiles: Vec<Tile>,
    /// Units, tile by tile with sources interleaved
    pub units: Vec<UnitKey>,
}

/// Handle for steering a job from outside while it runs.
#[derive(Debug, Clone)]
pub struct JobControl {
    job_id: String,
    cancel: CancellationToken,
    challenges: Arc<ChallengeHandler>,
    progress: watch::Receiver<JobProgress>,
}

impl JobControl {
    /// Job id.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop the job. Fetches in flight complete; nothing new is started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal every pending challenge as resolved; returns how many were.
    pub fn resolve_challenges(&self) -> usize {
        self.challenges.resolve_all()
    }

    /// Challenges waiting for resolution.
    #[must_use]
    pub fn pending_challenges(&self) -> Vec<PendingChallenge> {
        self.challenges.pending()
    }

    /// Latest progress.
    #[must_use]
    pub fn progress(&self) -> JobProgress {
        *self.progress.borrow()
    }

    /// A receiver that sees every progress update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }
}

/// A validated job, ready to execute.
#[derive(Debug)]
pub struct PreparedJob {
    checkpoint: JobCheckpoint,
    plan: JobPlan,
    control: JobControl,
    progress: watch::Sender<JobProgress>,
    resumed: bool,
}

impl PreparedJob {
    /// Job id.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.checkpoint.job_id
    }

    /// The query being run.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.checkpoint.query
    }

    /// Control handle for the job.
    #[must_use]
    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// The job's plan.
    #[must_use]
    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    /// Whether the job continues from a checkpoint.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }
}

/// Drives discovery jobs.
pub struct Orchestrator {
    registry: SourceRegistry,
    robots_fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn LeadStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimiter>,
    config: AppConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sources", &self.registry.ids())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// `robots_fetcher` retrieves robots.txt files; `store` receives canonical
    /// leads; `checkpoints` keeps resumable job state.
    #[must_use]
    pub fn new(
        registry: SourceRegistry,
        robots_fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn LeadStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            registry,
            robots_fetcher,
            store,
            checkpoints,
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config,
        }
    }

    /// Source registry in use.
    #[must_use]
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Rate limiter shared by every job of this orchestrator.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Checkpoint store in use.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Validate a query and work out its units.
    pub fn plan(&self, query: &Query) -> Result<JobPlan> {
        self.plan_with(query, &self.config.tiling)
    }

    fn plan_with(&self, query: &Query, tiling: &TilingConfig) -> Result<JobPlan> {
        query
            .validate()
            .map_err(|e| ScanError::InvalidQuery(e.to_string()))?;
        if let Some(unknown) = query.sources.iter().find(|s| !self.registry.contains(s)) {
            return Err(ScanError::InvalidQuery(format!("unknown source '{unknown}'")));
        }

        let tiles = Tiler::new(tiling.clone()).plan(query)?;
        let units = tiles
            .iter()
            .flat_map(|tile| {
                query
                    .sources
                    .iter()
                    .map(|source| UnitKey::new(source.clone(), tile.id.clone()))
            })
            .collect();
        Ok(JobPlan { tiles, units })
    }

    /// Validate a query and set up a new job for it.
    pub fn prepare(&self, query: Query) -> Result<PreparedJob> {
        let plan = self.plan(&query)?;
        let job_id = uuid::Uuid::new_v4().to_string();
        let checkpoint = JobCheckpoint::new(job_id, query, self.config.tiling.clone());
        Ok(self.prepared(checkpoint, plan, false))
    }

    /// Set up a job to continue from its stored checkpoint.
    pub async fn prepare_resume(&self, job_id: &str) -> Result<PreparedJob> {
        let mut checkpoint = JobCheckpoint::load(self.checkpoints.as_ref(), job_id)
            .await?
            .ok_or_else(|| ScanError::JobNotFound(job_id.to_string()))?;
        let plan = self.plan_with(&checkpoint.query, &checkpoint.tiling)?;
        checkpoint.suspended_units.clear();
        Ok(self.prepared(checkpoint, plan, true))
    }

    fn prepared(&self, checkpoint: JobCheckpoint, plan: JobPlan, resumed: bool) -> PreparedJob {
        let (progress, progress_rx) = watch::channel(JobProgress {
            units_total: plan.units.len(),
            ..JobProgress::default()
        });
        let control = JobControl {
            job_id: checkpoint.job_id.clone(),
            cancel: CancellationToken::new(),
            challenges: Arc::new(ChallengeHandler::new(
                self.config.challenge.resolution_timeout(),
            )),
            progress: progress_rx,
        };
        PreparedJob {
            checkpoint,
            plan,
            control,
            progress,
            resumed,
        }
    }

    /// Run a new job to completion.
    pub async fn run(&self, query: Query) -> Result<JobResult> {
        let job = self.prepare(query)?;
        self.execute(job).await
    }

    /// Continue a job from its checkpoint and run it to completion.
    pub async fn resume(&self, job_id: &str) -> Result<JobResult> {
        let job = self.prepare_resume(job_id).await?;
        self.execute(job).await
    }

    /// Execute a prepared job.
    ///
    /// Unit failures and storage errors are reported in the result; an `Err`
    /// is only returned when the job could not start.
    pub async fn execute(&self, job: PreparedJob) -> Result<JobResult> {
        let PreparedJob {
            checkpoint,
            plan,
            control,
            progress,
            resumed,
        } = job;
        let started = Instant::now();
        let job_id = checkpoint.job_id.clone();
        let query = checkpoint.query.clone();

        tracing::info!(
            job_id = %job_id,
            niche = %query.niche,
            city = %query.city,
            limit = query.limit,
            units = plan.units.len(),
            resumed,
            "starting discovery job"
        );

        for source in &query.sources {
            let adapter = self.registry.get(source)?;
            if let Some(delay) = adapter.min_delay() {
                self.limiter.set_min_delay(source, delay).await;
            }
        }

        let robots = if self.config.scanning.respect_robots_txt {
            RobotsGate::new(
                Arc::clone(&self.robots_fetcher),
                self.config.scanning.user_agent.clone(),
            )
            .with_max_crawl_delay(self.config.rate_limit.max_crawl_delay())
        } else {
            RobotsGate::disabled(Arc::clone(&self.robots_fetcher))
        };
        let runtime = JobRuntime {
            job_id: job_id.clone(),
            robots,
            challenges: Arc::clone(&control.challenges),
            stop: control.cancel.child_token(),
            slots: Semaphore::new(self.config.scanning.concurrent_units.max(1)),
        };

        let engine = DedupEngine::replay(&self.config.dedup, &checkpoint.candidates);
        let mut collector = Collector {
            limit: query.limit,
            units_total: plan.units.len(),
            store: self.store.as_ref(),
            checkpoints: self.checkpoints.as_ref(),
            stop: &runtime.stop,
            progress: &progress,
            checkpoint,
            engine,
            storage_errors: Vec::new(),
        };
        if resumed {
            collector.restore_leads().await;
        }
        if collector.checkpoint.limit_reached {
            runtime.stop.cancel();
        }
        collector.save().await;
        collector.publish();

        let tiles: HashMap<TileId, Tile> = plan
            .tiles
            .iter()
            .map(|tile| (tile.id.clone(), tile.clone()))
            .collect();
        let mut walks = Vec::new();
        for unit in collector.checkpoint.remaining_units(&plan.units) {
            let Some(tile) = tiles.get(&unit.tile) else {
                continue;
            };
            let adapter = self.registry.get(&unit.source)?;
            let (cursor, yielded) = collector.checkpoint.position(&unit);
            let walk =
                Discovery::new(adapter, query.clone(), tile.clone()).resume_from(cursor, yielded);
            walks.push((unit, walk));
        }

        let (events, mut inbox) = mpsc::channel(EVENT_BUFFER);
        let producer = self.drive_units(&runtime, walks, events);
        let consumer = async {
            while let Some(event) = inbox.recv().await {
                collector.handle(event).await;
            }
        };
        tokio::join!(producer, consumer);

        let cancelled = control.cancel.is_cancelled();
        if !cancelled {
            let cleared = runtime.challenges.clear_all();
            if cleared > 0 {
                tracing::debug!(job_id = %job_id, cleared, "dropping challenges of finished units");
            }
        }
        let result = collector.result(job_id.clone(), cancelled, started.elapsed());

        let keep = cancelled
            || !result.failed_units.is_empty()
            || self.config.storage.retain_completed_checkpoints;
        if keep {
            collector.save().await;
        } else if let Err(e) = self.checkpoints.delete(&job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to delete checkpoint");
        }

        tracing::info!(
            job_id = %job_id,
            total_found = result.total_found,
            inserted = result.inserted,
            skipped_duplicates = result.skipped_duplicates,
            failed_units = result.failed_units.len(),
            cancelled,
            duration = ?result.duration,
            "discovery job finished"
        );
        Ok(result)
    }

    async fn drive_units(
        &self,
        runtime: &JobRuntime,
        walks: Vec<(UnitKey, Discovery)>,
        events: mpsc::Sender<UnitEvent>,
    ) {
        let mut running: FuturesUnordered<_> = walks
            .into_iter()
            .map(|(unit, walk)| self.run_unit(runtime, unit, walk, events.clone()))
            .collect();
        drop(events);
        while running.next().await.is_some() {}
    }

    async fn run_unit(
        &self,
        runtime: &JobRuntime,
        unit: UnitKey,
        mut walk: Discovery,
        events: mpsc::Sender<UnitEvent>,
    ) {
        let outcome = self.walk_unit(runtime, &unit, &mut walk, &events).await;
        match &outcome {
            UnitOutcome::Exhausted => {
                tracing::debug!(
                    job_id = %runtime.job_id,
                    unit = %unit,
                    yielded = walk.yielded(),
                    "unit exhausted"
                );
            }
            UnitOutcome::Stopped => {
                tracing::debug!(job_id = %runtime.job_id, unit = %unit, "unit stopped");
            }
            UnitOutcome::Failed(reason) => {
                tracing::warn!(job_id = %runtime.job_id, unit = %unit, reason = %reason, "unit failed");
            }
        }
        // A closed channel means the consumer is gone; nothing left to report to.
        let _ = events.send(UnitEvent::Finished { unit, outcome }).await;
    }

    async fn walk_unit(
        &self,
        runtime: &JobRuntime,
        unit: &UnitKey,
        walk: &mut Discovery,
        events: &mpsc::Sender<UnitEvent>,
    ) -> UnitOutcome {
        let Some(mut slot) = runtime.acquire_slot().await else {
            return UnitOutcome::Stopped;
        };

        loop {
            if walk.is_finished() {
                return UnitOutcome::Exhausted;
            }
            if runtime.stop.is_cancelled() {
                return UnitOutcome::Stopped;
            }

            let url = match walk.request_url() {
                Ok(url) => url,
                Err(e) => {
                    return UnitOutcome::Failed(FailureReason::Permanent {
                        message: e.to_string(),
                    })
                }
            };
            match runtime.robots.check(&url).await {
                RobotsDecision::Allowed => {}
                RobotsDecision::Disallowed => {
                    return UnitOutcome::Failed(FailureReason::RobotsDisallowed {
                        path: url_path(&url),
                    })
                }
                RobotsDecision::Unavailable(message) => {
                    return UnitOutcome::Failed(FailureReason::RobotsUnavailable { message })
                }
            }
            if let Some(delay) = url_host(&url).and_then(|host| runtime.robots.crawl_delay(&host)) {
                self.limiter.raise_min_delay(&unit.source, delay).await;
            }

            match self.fetch_page(runtime, unit, walk).await {
                Fetched::Page(response) => {
                    let candidates = match walk.accept(&response) {
                        Ok(candidates) => candidates,
                        Err(e) => {
                            return UnitOutcome::Failed(FailureReason::Permanent {
                                message: e.to_string(),
                            })
                        }
                    };
                    let page = UnitEvent::Page {
                        unit: unit.clone(),
                        candidates,
                        cursor: walk.cursor().cloned(),
                        yielded: walk.yielded(),
                        finished: walk.is_finished(),
                    };
                    if events.send(page).await.is_err() {
                        return UnitOutcome::Stopped;
                    }
                }
                Fetched::Challenge(response) => {
                    runtime.challenges.detect(unit, &response.final_url);
                    let (saved, checkpointed) = oneshot::channel();
                    let suspended = UnitEvent::Suspended {
                        unit: unit.clone(),
                        saved,
                    };
                    if events.send(suspended).await.is_err() {
                        return UnitOutcome::Stopped;
                    }
                    // Resolution only proceeds once the checkpoint is durable.
                    let _ = checkpointed.await;
                    runtime.challenges.suspend(unit);

                    drop(slot);
                    match runtime.challenges.await_resolution(unit, &runtime.stop).await {
                        Resolution::Resolved => {}
                        Resolution::TimedOut => return UnitOutcome::Failed(FailureReason::ChallengeTimeout),
                        Resolution::Cancelled => return UnitOutcome::Stopped,
                    }
                    slot = match runtime.acquire_slot().await {
                        Some(slot) => slot,
                        None => return UnitOutcome::Stopped,
                    };
                }
                Fetched::Stopped => return UnitOutcome::Stopped,
                Fetched::Failed(reason) => return UnitOutcome::Failed(reason),
            }
        }
    }

    /// Fetch the unit's next page, retrying transient failures under backoff.
    async fn fetch_page(&self, runtime: &JobRuntime, unit: &UnitKey, walk: &Discovery) -> Fetched {
        let source = &unit.source;
        let attempts = self.config.scanning.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            tokio::select! {
                () = self.limiter.acquire(source) => {}
                () = runtime.stop.cancelled() => return Fetched::Stopped,
            }

            let message = match walk.fetch().await {
                Ok(response) if walk.identify_challenge(&response) => {
                    return Fetched::Challenge(response)
                }
                Ok(response) if response.is_success() => {
                    self.limiter.record_success(source).await;
                    return Fetched::Page(response);
                }
                Ok(response) if response.is_transient_status() => {
                    format!("HTTP {} from {}", response.status, response.url)
                }
                Ok(response) => {
                    return Fetched::Failed(FailureReason::Permanent {
                        message: format!("HTTP {} from {}", response.status, response.url),
                    })
                }
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => {
                    return Fetched::Failed(FailureReason::Permanent {
                        message: e.to_string(),
                    })
                }
            };

            let delay = self.limiter.record_failure(source).await;
            if attempt < attempts {
                tracing::warn!(
                    unit = %unit,
                    attempt,
                    attempts,
                    backoff = ?delay,
                    error = %message,
                    "transient fetch failure; backing off"
                );
            }
            last_error = message;
        }

        tracing::warn!(unit = %unit, attempts, error = %last_error, "retries exhausted");
        Fetched::Failed(FailureReason::MaxRetriesExceeded {
            attempts,
            last_error,
        })
    }
}

fn url_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

fn url_path(url: &str) -> String {
    Url::parse(url).map_or_else(|_| url.to_string(), |u| u.path().to_string())
}

/// Per-run state shared by the units of one job.
struct JobRuntime {
    job_id: String,
    robots: RobotsGate,
    challenges: Arc<ChallengeHandler>,
    stop: CancellationToken,
    slots: Semaphore,
}

impl JobRuntime {
    async fn acquire_slot(&self) -> Option<SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.slots.acquire() => permit.ok(),
            () = self.stop.cancelled() => None,
        }
    }
}

enum Fetched {
    Page(FetchResponse),
    Challenge(FetchResponse),
    Stopped,
    Failed(FailureReason),
}

enum UnitOutcome {
    Exhausted,
    Stopped,
    Failed(FailureReason),
}

enum UnitEvent {
    Page {
        unit: UnitKey,
        candidates: Vec<LeadCandidate>,
        cursor: Option<Cursor>,
        yielded: usize,
        finished: bool,
    },
    Suspended {
        unit: UnitKey,
        saved: oneshot::Sender<()>,
    },
    Finished {
        unit: UnitKey,
        outcome: UnitOutcome,
    },
}

/// The single writer for dedup, storage and checkpoint state.
struct Collector<'a> {
    limit: usize,
    units_total: usize,
    store: &'a dyn LeadStore,
    checkpoints: &'a dyn CheckpointStore,
    stop: &'a CancellationToken,
    progress: &'a watch::Sender<JobProgress>,
    checkpoint: JobCheckpoint,
    engine: DedupEngine,
    storage_errors: Vec<String>,
}

impl Collector<'_> {
    async fn handle(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Page {
                unit,
                candidates,
                cursor,
                yielded,
                finished,
            } => {
                self.page(candidates).await;
                self.checkpoint.suspended_units.remove(&unit);
                self.checkpoint.advance(&unit, cursor, yielded);
                if finished {
                    self.checkpoint.complete(&unit);
                }
            }
            UnitEvent::Suspended { unit, saved } => {
                self.checkpoint.suspended_units.insert(unit);
                self.save().await;
                let _ = saved.send(());
            }
            UnitEvent::Finished { unit, outcome } => {
                match outcome {
                    UnitOutcome::Exhausted => self.checkpoint.complete(&unit),
                    UnitOutcome::Failed(reason) => self.checkpoint.fail(UnitFailure { unit, reason }),
                    UnitOutcome::Stopped => {}
                }
                self.save().await;
            }
        }
        self.publish();
    }

    async fn page(&mut self, candidates: Vec<LeadCandidate>) {
        self.checkpoint.total_found += candidates.len() as u64;
        for candidate in candidates {
            let admit = !self.checkpoint.limit_reached;
            match self.engine.merge(candidate, admit) {
                MergeOutcome::New { key } => {
                    self.put(&key).await;
                    if self.engine.len() >= self.limit {
                        self.checkpoint.limit_reached = true;
                        self.stop.cancel();
                        tracing::info!(
                            job_id = %self.checkpoint.job_id,
                            limit = self.limit,
                            "lead limit reached; stopping remaining units"
                        );
                    }
                }
                MergeOutcome::Merged { key } => self.update(&key).await,
                MergeOutcome::Combined { key, absorbed } => {
                    for old in &absorbed {
                        if let Err(e) = self.store.remove(old).await {
                            self.storage_error(old, &e);
                        }
                    }
                    self.update(&key).await;
                }
                MergeOutcome::Dropped => self.checkpoint.dropped_over_limit += 1,
            }
        }
    }

    async fn put(&mut self, key: &str) {
        let Some(lead) = self.engine.get(key) else {
            return;
        };
        match self.store.put(lead).await {
            Ok(PutOutcome::Inserted) => {}
            Ok(PutOutcome::Conflict) => {
                tracing::debug!(identity_key = %key, "lead already stored");
            }
            Err(e) => self.storage_error(key, &e),
        }
    }

    async fn update(&mut self, key: &str) {
        let Some(lead) = self.engine.get(key) else {
            return;
        };
        let result = match self.store.update(lead).await {
            Ok(true) => Ok(()),
            Ok(false) => self.store.put(lead).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.storage_error(key, &e);
        }
    }

    /// Re-deliver every replayed lead; stored ones are refreshed, not duplicated.
    async fn restore_leads(&mut self) {
        let keys: Vec<String> = self.engine.leads().map(|l| l.identity_key.clone()).collect();
        for key in keys {
            let Some(lead) = self.engine.get(&key) else {
                continue;
            };
            let result = match self.store.put(lead).await {
                Ok(PutOutcome::Inserted) => Ok(()),
                Ok(PutOutcome::Conflict) => self.store.update(lead).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.storage_error(&key, &e);
            }
        }
        tracing::debug!(
            job_id = %self.checkpoint.job_id,
            leads = self.engine.len(),
            "restored leads from checkpoint"
        );
    }

    fn storage_error(&mut self, key: &str, error: &DatabaseError) {
        let error = ScanError::StorageWrite(format!("{key}: {error}"));
        tracing::warn!(job_id = %self.checkpoint.job_id, error = %error, "lead write failed");
        self.storage_errors.push(error.to_string());
    }

    async fn save(&mut self) {
        self.checkpoint.candidates = self.engine.candidates().cloned().collect();
        if let Err(e) = self.checkpoint.save(self.checkpoints).await {
            tracing::warn!(job_id = %self.checkpoint.job_id, error = %e, "failed to save checkpoint");
        }
    }

    fn publish(&self) {
        self.progress.send_replace(JobProgress {
            units_total: self.units_total,
            units_processed: self.checkpoint.completed_units.len()
                + self.checkpoint.failed_units.len(),
            leads_found: self.engine.len(),
            candidates_seen: self.checkpoint.total_found,
        });
    }

    fn result(&self, job_id: String, cancelled: bool, duration: Duration) -> JobResult {
        JobResult {
            job_id,
            total_found: self.checkpoint.total_found,
            inserted: self.engine.len() as u64,
            skipped_duplicates: self.engine.stats().duplicates() as u64,
            dropped_over_limit: self.checkpoint.dropped_over_limit,
            failed_units: self.checkpoint.failed_units.clone(),
            storage_errors: self.storage_errors.clone(),
            units_total: self.units_total,
            units_completed: self.checkpoint.completed_units.len(),
            cancelled,
            limit_reached: self.checkpoint.limit_reached,
            duration,
        }
    }
}

//! Scripted sources and fixtures shared by the scanner integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use leadscout_core::{
    AppConfig, CanonicalLead, LeadCandidate, Query, RateLimitConfig, SourceId, Tile,
};
use leadscout_db::{
    DatabaseError, LeadFilter, LeadStats, LeadStore, MemoryCheckpointStore, MemoryLeadStore,
    PutOutcome,
};
use leadscout_scanner::Orchestrator;
use leadscout_sources::{
    Cursor, FetchResponse, PageFetcher, SourceAdapter, SourceError, SourcePage, SourceRegistry,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CHALLENGE_PAGE: &str = r#"<html><div class="g-recaptcha"></div></html>"#;

pub fn source_id(id: &str) -> SourceId {
    SourceId::new(id).expect("valid source id")
}

pub fn lead(source: &str, name: &str, address: &str) -> LeadCandidate {
    LeadCandidate::new(source_id(source), name)
        .with_address(address)
        .with_location("Lahore", "Pakistan")
        .with_niche("coffee shop")
}

/// A source that serves fixed pages per tile and never touches the network.
pub struct ScriptedSource {
    id: SourceId,
    domain: String,
    pages: HashMap<String, Vec<Vec<LeadCandidate>>>,
    challenges: Mutex<HashSet<(String, usize)>>,
    transient_failures: AtomicU32,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: source_id(id),
            domain: format!("{id}.test"),
            pages: HashMap::new(),
            challenges: Mutex::new(HashSet::new()),
            transient_failures: AtomicU32::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Append a page of candidates for `tile`.
    pub fn page(mut self, tile: &str, candidates: Vec<LeadCandidate>) -> Self {
        self.pages.entry(tile.to_string()).or_default().push(candidates);
        self
    }

    /// Serve a challenge instead of `page` of `tile` until cleared.
    pub fn challenge_on(self, tile: &str, page: usize) -> Self {
        self.challenges
            .lock()
            .expect("challenge lock")
            .insert((tile.to_string(), page));
        self
    }

    /// Answer the first `n` fetches with HTTP 503.
    pub fn fail_first(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn clear_challenges(&self) {
        self.challenges.lock().expect("challenge lock").clear();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn page_index(cursor: Option<&Cursor>) -> usize {
        cursor.and_then(|c| c.as_str().parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn request_url(
        &self,
        _: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> leadscout_sources::Result<String> {
        Ok(format!(
            "https://{}/search?tile={}&page={}",
            self.domain,
            tile.id,
            Self::page_index(cursor)
        ))
    }

    async fn fetch(
        &self,
        query: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> leadscout_sources::Result<FetchResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let url = self.request_url(query, tile, cursor)?;

        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Ok(FetchResponse::with_status(url, 503, "Service Unavailable"));
        }

        let key = (tile.id.to_string(), Self::page_index(cursor));
        if self.challenges.lock().expect("challenge lock").contains(&key) {
            return Ok(FetchResponse::ok(url, CHALLENGE_PAGE));
        }
        Ok(FetchResponse::ok(url, "<html></html>"))
    }

    fn extract(
        &self,
        _: &FetchResponse,
        _: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> leadscout_sources::Result<SourcePage> {
        let pages = self.pages.get(tile.id.as_str()).map_or(&[][..], Vec::as_slice);
        let index = Self::page_index(cursor);
        let candidates = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len()).then(|| Cursor::position(index + 1));
        Ok(SourcePage {
            candidates,
            next_cursor,
        })
    }

    fn identify_challenge(&self, response: &FetchResponse) -> bool {
        response.body.contains("g-recaptcha")
    }
}

/// Serves robots.txt per domain and counts requests. Unknown domains get 404.
#[derive(Default)]
pub struct RobotsServer {
    files: HashMap<String, Option<(u16, String)>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl RobotsServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, domain: &str, status: u16, body: &str) -> Self {
        self.files
            .insert(domain.to_string(), Some((status, body.to_string())));
        self
    }

    pub fn unreachable(mut self, domain: &str) -> Self {
        self.files.insert(domain.to_string(), None);
        self
    }

    pub fn requests(&self, domain: &str) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .get(domain)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for RobotsServer {
    async fn fetch(&self, url: &str) -> leadscout_sources::Result<FetchResponse> {
        let domain = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        *self
            .requests
            .lock()
            .expect("requests lock")
            .entry(domain.clone())
            .or_default() += 1;

        match self.files.get(&domain) {
            Some(Some((status, body))) => Ok(FetchResponse::with_status(url, *status, body.clone())),
            Some(None) => Err(SourceError::Transient {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
            None => Ok(FetchResponse::with_status(url, 404, "")),
        }
    }
}

/// Memory store that remembers which identity keys were newly inserted.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryLeadStore,
    inserted: Mutex<Vec<String>>,
    failing_name: Mutex<Option<String>>,
}

impl RecordingStore {
    /// Make every `put` of a lead named `name` fail with an I/O error.
    pub fn fail_puts_for(&self, name: &str) {
        *self.failing_name.lock().expect("failing lock") = Some(name.to_string());
    }

    pub fn inserted(&self) -> Vec<String> {
        self.inserted.lock().expect("inserted lock").clone()
    }

    pub fn leads(&self) -> Vec<CanonicalLead> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl LeadStore for RecordingStore {
    async fn put(&self, lead: &CanonicalLead) -> leadscout_db::Result<PutOutcome> {
        if self.failing_name.lock().expect("failing lock").as_deref() == Some(lead.name.as_str()) {
            return Err(DatabaseError::Io(std::io::Error::other("disk full")));
        }
        let outcome = self.inner.put(lead).await?;
        if outcome == PutOutcome::Inserted {
            self.inserted
                .lock()
                .expect("inserted lock")
                .push(lead.identity_key.clone());
        }
        Ok(outcome)
    }

    async fn update(&self, lead: &CanonicalLead) -> leadscout_db::Result<bool> {
        self.inner.update(lead).await
    }

    async fn remove(&self, identity_key: &str) -> leadscout_db::Result<bool> {
        self.inner.remove(identity_key).await
    }

    async fn get(&self, identity_key: &str) -> leadscout_db::Result<Option<CanonicalLead>> {
        self.inner.get(identity_key).await
    }

    async fn query(&self, filter: &LeadFilter) -> leadscout_db::Result<Vec<CanonicalLead>> {
        self.inner.query(filter).await
    }

    async fn stats(&self) -> leadscout_db::Result<LeadStats> {
        self.inner.stats().await
    }
}

/// Config with no pacing delay and 1s/8s backoff.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit = RateLimitConfig {
        min_delay_ms: 0,
        backoff_base_ms: 1000,
        backoff_cap_ms: 8000,
        jitter_ms: 0,
        ..RateLimitConfig::default()
    };
    config.tiling.tile_overlap = 0.0;
    config
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<RecordingStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub robots: Arc<RobotsServer>,
}

pub fn harness(sources: &[Arc<ScriptedSource>], robots: RobotsServer, config: AppConfig) -> Harness {
    let registry = SourceRegistry::new();
    for source in sources {
        registry.register(Arc::clone(source) as Arc<dyn SourceAdapter>);
    }
    let store = Arc::new(RecordingStore::default());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let robots = Arc::new(robots);

    let orchestrator = Orchestrator::new(
        registry,
        Arc::clone(&robots) as Arc<dyn PageFetcher>,
        Arc::clone(&store) as Arc<dyn LeadStore>,
        Arc::clone(&checkpoints) as Arc<dyn leadscout_db::CheckpointStore>,
        config,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        checkpoints,
        robots,
    }
}

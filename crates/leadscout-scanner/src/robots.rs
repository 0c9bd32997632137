//! robots.txt compliance.
//!
//! Rules are fetched once per domain per job. The first unit that needs a
//! domain fetches its robots.txt; concurrent units for the same domain wait on
//! the same cell instead of fetching again.
//!
//! A missing robots.txt (404/410) allows everything. Any other failure to get
//! usable rules is fail-closed: the domain is treated as disallowed for the
//! rest of the job.

use leadscout_sources::PageFetcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use texting_robots::Robot;
use tokio::sync::OnceCell;
use url::Url;

/// Ceiling on a published `Crawl-delay` unless the caller sets one.
const DEFAULT_MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Outcome of a robots check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsDecision {
    /// The path may be fetched
    Allowed,
    /// The rules forbid the path
    Disallowed,
    /// Rules could not be obtained; nothing on the domain may be fetched
    Unavailable(String),
}

impl RobotsDecision {
    /// Whether the fetch may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

enum DomainRules {
    AllowAll,
    Parsed(Robot),
    Unavailable(String),
}

/// Cached robots rules, keyed by domain.
pub struct RobotsGate {
    fetcher: Arc<dyn PageFetcher>,
    user_agent: String,
    enabled: bool,
    max_crawl_delay: Duration,
    rules: Mutex<HashMap<String, Arc<OnceCell<DomainRules>>>>,
}

impl std::fmt::Debug for RobotsGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsGate")
            .field("user_agent", &self.user_agent)
            .field("enabled", &self.enabled)
            .field("max_crawl_delay", &self.max_crawl_delay)
            .finish_non_exhaustive()
    }
}

impl RobotsGate {
    /// Create a gate that fetches robots.txt through `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn PageFetcher>, user_agent: impl Into<String>) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
            enabled: true,
            max_crawl_delay: DEFAULT_MAX_CRAWL_DELAY,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the `Crawl-delay` a site can impose.
    #[must_use]
    pub fn with_max_crawl_delay(mut self, max: Duration) -> Self {
        self.max_crawl_delay = max;
        self
    }

    /// A gate that allows everything and never fetches.
    #[must_use]
    pub fn disabled(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            enabled: false,
            ..Self::new(fetcher, "")
        }
    }

    /// Whether the gate checks anything.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `path` on `domain` may be fetched (over https).
    pub async fn is_allowed(&self, domain: &str, path: &str) -> bool {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self.check(&format!("https://{domain}{path}")).await.is_allowed()
    }

    /// Check a full request URL.
    pub async fn check(&self, url: &str) -> RobotsDecision {
        if !self.enabled {
            return RobotsDecision::Allowed;
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return RobotsDecision::Unavailable(format!("invalid URL {url}: {e}")),
        };
        let Some(domain) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return RobotsDecision::Unavailable(format!("URL has no host: {url}"));
        };

        let cell = self.cell(&domain);
        let rules = cell
            .get_or_init(|| self.fetch_rules(parsed.scheme(), &domain))
            .await;
        match rules {
            DomainRules::AllowAll => RobotsDecision::Allowed,
            DomainRules::Unavailable(reason) => RobotsDecision::Unavailable(reason.clone()),
            DomainRules::Parsed(robot) => {
                if robot.allowed(url) {
                    RobotsDecision::Allowed
                } else {
                    tracing::info!(
                        domain = %domain,
                        path = parsed.path(),
                        "robots.txt disallows path"
                    );
                    RobotsDecision::Disallowed
                }
            }
        }
    }

    /// `Crawl-delay` published for a domain, once its rules are cached.
    ///
    /// Values that are not a positive number of seconds are ignored; larger
    /// ones are clamped to the configured maximum.
    #[must_use]
    pub fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        let cell = self.cell(&domain.to_ascii_lowercase());
        let DomainRules::Parsed(robot) = cell.get()? else {
            return None;
        };
        let seconds = robot.delay.filter(|d| *d > 0.0)?;
        let delay = Duration::try_from_secs_f32(seconds).unwrap_or(Duration::MAX);
        if delay > self.max_crawl_delay {
            tracing::warn!(
                domain = %domain,
                requested = ?delay,
                max = ?self.max_crawl_delay,
                "clamping robots.txt crawl delay"
            );
            return Some(self.max_crawl_delay);
        }
        Some(delay)
    }

    fn cell(&self, domain: &str) -> Arc<OnceCell<DomainRules>> {
        let mut rules = self.rules.lock().expect("robots cache lock");
        Arc::clone(rules.entry(domain.to_string()).or_default())
    }

    async fn fetch_rules(&self, scheme: &str, domain: &str) -> DomainRules {
        let robots_url = format!("{scheme}://{domain}/robots.txt");
        tracing::debug!(url = %robots_url, "fetching robots.txt");

        let response = match self.fetcher.fetch(&robots_url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    domain = %domain,
                    error = %e,
                    "robots.txt fetch failed; skipping domain"
                );
                return DomainRules::Unavailable(e.to_string());
            }
        };

        match response.status {
            404 | 410 => DomainRules::AllowAll,
            status if (200..300).contains(&status) => {
                match Robot::new(&self.user_agent, response.body.as_bytes()) {
                    Ok(robot) => DomainRules::Parsed(robot),
                    Err(e) => {
                        tracing::warn!(
                            domain = %domain,
                            error = %e,
                            "robots.txt unparsable; skipping domain"
                        );
                        DomainRules::Unavailable(format!("unparsable robots.txt: {e}"))
                    }
                }
            }
            status => {
                tracing::warn!(domain = %domain, status, "robots.txt unavailable; skipping domain");
                DomainRules::Unavailable(format!("robots.txt returned HTTP {status}"))
            }
        }
    }
}

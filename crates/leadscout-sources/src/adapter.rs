//! The source adapter contract.
//!
//! An adapter knows how to ask one source for one page of results and how to
//! read that page. It does no pacing, robots checks, or retries; those are
//! applied uniformly by whoever drives the adapter.

use crate::error::Result;
use crate::fetcher::FetchResponse;
use async_trait::async_trait;
use leadscout_core::{LeadCandidate, Query, SourceId, Tile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque position within one (source, tile) result sequence.
///
/// Only the adapter that produced a cursor interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a raw cursor value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Cursor for a numeric page or offset.
    #[must_use]
    pub fn position(position: usize) -> Self {
        Self(position.to_string())
    }

    /// Raw cursor value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidates read from one page, plus where the next page starts.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    /// Candidates in the source's scan order
    pub candidates: Vec<LeadCandidate>,
    /// `None` when the source has nothing more for this tile
    pub next_cursor: Option<Cursor>,
}

/// One pluggable lead source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source identifier.
    fn id(&self) -> &SourceId;

    /// Domain whose robots rules and rate budget apply.
    fn domain(&self) -> &str;

    /// Minimum delay between requests this source asks for, if stricter than the default.
    fn min_delay(&self) -> Option<Duration> {
        None
    }

    /// URL of the page at `cursor` (first page when `None`).
    fn request_url(&self, query: &Query, tile: &Tile, cursor: Option<&Cursor>) -> Result<String>;

    /// Retrieve the page at `cursor`.
    async fn fetch(&self, query: &Query, tile: &Tile, cursor: Option<&Cursor>)
        -> Result<FetchResponse>;

    /// Read candidates from a fetched page. Must not be called on a challenge page.
    fn extract(
        &self,
        response: &FetchResponse,
        query: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> Result<SourcePage>;

    /// Whether the response is an anti-bot interruption. Side-effect free.
    fn identify_challenge(&self, response: &FetchResponse) -> bool;
}

/// What one step of a [`Discovery`] produced.
#[derive(Debug)]
pub enum DiscoveryStep {
    /// Candidates from the next page
    Page(Vec<LeadCandidate>),
    /// The page was a challenge; the cursor did not move
    Challenge(FetchResponse),
}

/// Lazy, restartable walk over one (source, tile) result sequence.
///
/// Stops after `limit` candidates or when the source runs out. The cursor
/// only advances when a page is accepted, so a challenged page is fetched
/// again from the same position.
pub struct Discovery {
    adapter: Arc<dyn SourceAdapter>,
    query: Query,
    tile: Tile,
    cursor: Option<Cursor>,
    yielded: usize,
    limit: usize,
    finished: bool,
}

impl Discovery {
    /// Start at the first page, bounded by `query.limit`.
    #[must_use]
    pub fn new(adapter: Arc<dyn SourceAdapter>, query: Query, tile: Tile) -> Self {
        let limit = query.limit;
        Self {
            adapter,
            query,
            tile,
            cursor: None,
            yielded: 0,
            limit,
            finished: false,
        }
    }

    /// Continue from a saved cursor with `yielded` candidates already produced.
    #[must_use]
    pub fn resume_from(mut self, cursor: Option<Cursor>, yielded: usize) -> Self {
        self.cursor = cursor;
        self.yielded = yielded;
        self.finished = yielded >= self.limit;
        self
    }

    /// The adapter being walked.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn SourceAdapter> {
        &self.adapter
    }

    /// Tile being walked.
    #[must_use]
    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    /// Position of the next page.
    #[must_use]
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Candidates produced so far.
    #[must_use]
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Whether the sequence has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// URL of the next page.
    pub fn request_url(&self) -> Result<String> {
        self.adapter
            .request_url(&self.query, &self.tile, self.cursor.as_ref())
    }

    /// Fetch the next page without advancing.
    pub async fn fetch(&self) -> Result<FetchResponse> {
        self.adapter
            .fetch(&self.query, &self.tile, self.cursor.as_ref())
            .await
    }

    /// Whether a fetched page is a challenge.
    #[must_use]
    pub fn identify_challenge(&self, response: &FetchResponse) -> bool {
        self.adapter.identify_challenge(response)
    }

    /// Extract a fetched page and advance the cursor.
    ///
    /// Candidates beyond the remaining limit are dropped and end the sequence.
    pub fn accept(&mut self, response: &FetchResponse) -> Result<Vec<LeadCandidate>> {
        let page = self
            .adapter
            .extract(response, &self.query, &self.tile, self.cursor.as_ref())?;

        let remaining = self.limit.saturating_sub(self.yielded);
        let mut candidates = page.candidates;
        if candidates.len() >= remaining {
            candidates.truncate(remaining);
            self.finished = true;
        }
        self.yielded += candidates.len();

        match page.next_cursor {
            Some(next) if !self.finished => self.cursor = Some(next),
            _ => self.finished = true,
        }

        Ok(candidates)
    }

    /// Fetch and accept the next page with no policy applied.
    ///
    /// Returns `None` once the sequence has ended.
    pub async fn next_page(&mut self) -> Result<Option<DiscoveryStep>> {
        if self.finished {
            return Ok(None);
        }

        let response = self.fetch().await?;
        if self.identify_challenge(&response) {
            return Ok(Some(DiscoveryStep::Challenge(response)));
        }
        response.error_for_status()?;

        self.accept(&response).map(|c| Some(DiscoveryStep::Page(c)))
    }
}

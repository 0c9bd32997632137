//! Map search scoped to one tile's viewport.

use super::{Position, SourceCore};
use crate::adapter::{Cursor, SourceAdapter, SourcePage};
use crate::error::Result;
use crate::fetcher::FetchResponse;
use async_trait::async_trait;
use leadscout_core::{LeadCandidate, Query, SourceId, Tile};
use std::time::Duration;

/// Map search adapter.
///
/// Uses `viewport_template` for geographic tiles and keeps only results whose
/// coordinates fall inside the tile. The cursor is a result offset.
pub struct MapsAdapter {
    core: SourceCore,
}

impl MapsAdapter {
    /// Wrap shared adapter state.
    #[must_use]
    pub fn new(core: SourceCore) -> Self {
        Self { core }
    }

    fn template(&self, tile: &Tile) -> &str {
        let source = &self.core.definition().source;
        match &source.viewport_template {
            Some(viewport) if !tile.is_city_wide() => viewport,
            _ => &source.search_template,
        }
    }

    fn in_tile(candidate: &LeadCandidate, tile: &Tile) -> bool {
        if tile.is_city_wide() {
            return true;
        }
        let coord = |key: &str| {
            candidate
                .extra_fields
                .get(key)
                .and_then(|v| v.parse::<f64>().ok())
        };
        match (coord("latitude"), coord("longitude")) {
            (Some(lat), Some(lon)) => tile.contains(lat, lon),
            _ => true,
        }
    }
}

#[async_trait]
impl SourceAdapter for MapsAdapter {
    fn id(&self) -> &SourceId {
        self.core.id()
    }

    fn domain(&self) -> &str {
        self.core.domain()
    }

    fn min_delay(&self) -> Option<Duration> {
        self.core.definition().min_delay()
    }

    fn request_url(&self, query: &Query, tile: &Tile, cursor: Option<&Cursor>) -> Result<String> {
        let offset = self.core.position(cursor, 0)?;
        let position = Position {
            page: offset / self.core.page_size() + 1,
            offset,
        };
        Ok(self.core.render(self.template(tile), query, tile, position))
    }

    async fn fetch(
        &self,
        query: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> Result<FetchResponse> {
        let url = self.request_url(query, tile, cursor)?;
        self.core.fetch_url(&url).await
    }

    fn extract(
        &self,
        response: &FetchResponse,
        query: &Query,
        tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> Result<SourcePage> {
        response.error_for_status()?;
        let offset = self.core.position(cursor, 0)?;
        let page = self.core.extractor().extract(&response.body, query);

        let candidates: Vec<LeadCandidate> = page
            .candidates
            .into_iter()
            .filter(|c| Self::in_tile(c, tile))
            .collect();

        let page_size = self.core.page_size();
        let next_offset = offset + page_size;
        let next_cursor = (page.items_seen >= page_size
            && next_offset < page_size * self.core.max_pages())
        .then(|| Cursor::position(next_offset));

        Ok(SourcePage {
            candidates,
            next_cursor,
        })
    }

    fn identify_challenge(&self, response: &FetchResponse) -> bool {
        self.core.identify_challenge(response)
    }
}

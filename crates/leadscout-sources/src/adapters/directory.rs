//! Business directories with numbered result pages.

use super::{Position, SourceCore};
use crate::adapter::{Cursor, SourceAdapter, SourcePage};
use crate::error::Result;
use crate::fetcher::FetchResponse;
use async_trait::async_trait;
use leadscout_core::{Query, SourceId, Tile};
use std::time::Duration;

/// Directory adapter; the cursor is the 1-based number of the next page.
///
/// When the definition has a `next_page` selector, its presence alone decides
/// whether another page exists.
pub struct DirectoryAdapter {
    core: SourceCore,
}

impl DirectoryAdapter {
    /// Wrap shared adapter state.
    #[must_use]
    pub fn new(core: SourceCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl SourceAdapter for DirectoryAdapter {
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
        let page = self.core.position(cursor, 1)?.max(1);
        let position = Position {
            page,
            offset: (page - 1) * self.core.page_size(),
        };
        Ok(self.core.render(
            &self.core.definition().source.search_template,
            query,
            tile,
            position,
        ))
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
        _tile: &Tile,
        cursor: Option<&Cursor>,
    ) -> Result<SourcePage> {
        response.error_for_status()?;
        let page_number = self.core.position(cursor, 1)?.max(1);
        let page = self.core.extractor().extract(&response.body, query);

        let more = if self.core.definition().selectors.next_page.is_some() {
            page.has_next_page
        } else {
            page.items_seen >= self.core.page_size()
        };
        let next_cursor = (more && page_number < self.core.max_pages())
            .then(|| Cursor::position(page_number + 1));

        Ok(SourcePage {
            candidates: page.candidates,
            next_cursor,
        })
    }

    fn identify_challenge(&self, response: &FetchResponse) -> bool {
        self.core.identify_challenge(response)
    }
}

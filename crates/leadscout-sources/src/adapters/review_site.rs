//! Review sites paged by result offset.

use super::{Position, SourceCore};
use crate::adapter::{Cursor, SourceAdapter, SourcePage};
use crate::error::Result;
use crate::fetcher::FetchResponse;
use async_trait::async_trait;
use leadscout_core::{Query, SourceId, Tile};
use std::time::Duration;

/// Review site adapter; the cursor is the offset of the next result.
pub struct ReviewSiteAdapter {
    core: SourceCore,
}

impl ReviewSiteAdapter {
    /// Wrap shared adapter state.
    #[must_use]
    pub fn new(core: SourceCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl SourceAdapter for ReviewSiteAdapter {
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
        let offset = self.core.position(cursor, 0)?;
        let page = self.core.extractor().extract(&response.body, query);

        // Review listings interleave ads, so a short page can still have a successor
        // when the source marks one.
        let page_size = self.core.page_size();
        let next_offset = offset + page_size;
        let more = page.has_next_page || page.items_seen >= page_size;
        let next_cursor = (more && page.items_seen > 0 && next_offset < page_size * self.core.max_pages())
            .then(|| Cursor::position(next_offset));

        Ok(SourcePage {
            candidates: page.candidates,
            next_cursor,
        })
    }

    fn identify_challenge(&self, response: &FetchResponse) -> bool {
        self.core.identify_challenge(response)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::adapter::{Discovery, DiscoveryStep};
    use crate::definition::SourceKind;
    use crate::fetcher::PageFetcher;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pages_by_offset_until_short_page() {
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with_page(
                    "https://src.test/search?q=coffee+shop&loc=Lahore&start=0",
                    &format!("{}{}", item("Gloria Jeans"), item("Espresso")),
                )
                .with_page(
                    "https://src.test/search?q=coffee+shop&loc=Lahore&start=2",
                    &item("Second Cup"),
                ),
        );
        let def = definition(
            SourceKind::ReviewSite,
            "https://src.test/search?q={niche}&loc={city}&start={offset}",
        );
        let dyn_fetcher: Arc<dyn PageFetcher> = fetcher.clone();
        let adapter: Arc<dyn SourceAdapter> = Arc::new(ReviewSiteAdapter::new(
            SourceCore::new(def, dyn_fetcher, &[]).expect("build core"),
        ));

        let mut walk = Discovery::new(adapter, query(), Tile::city_wide());
        let mut names = Vec::new();
        while let Some(step) = walk.next_page().await.expect("page") {
            if let DiscoveryStep::Page(candidates) = step {
                names.extend(candidates.into_iter().map(|c| c.name));
            }
        }

        assert_eq!(names, vec!["Gloria Jeans", "Espresso", "Second Cup"]);
        assert_eq!(fetcher.requests.lock().expect("requests lock").len(), 2);
    }

    #[test]
    fn test_rejects_foreign_cursor() {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(CannedFetcher::default());
        let def = definition(SourceKind::ReviewSite, "https://src.test/?q={niche}&start={offset}");
        let adapter = ReviewSiteAdapter::new(SourceCore::new(def, fetcher, &[]).expect("build core"));
        let result = adapter.request_url(&query(), &Tile::city_wide(), Some(&Cursor::new("page-two")));
        assert!(result.is_err());
    }
}

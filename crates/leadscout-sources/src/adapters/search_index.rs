//! General web search used as a fallback source.

use super::{Position, SourceCore};
use crate::adapter::{Cursor, SourceAdapter, SourcePage};
use crate::error::Result;
use crate::fetcher::FetchResponse;
use async_trait::async_trait;
use leadscout_core::{LeadCandidate, Query, SourceId, Tile};
use std::time::Duration;

/// Search index adapter.
///
/// Each result is a web page rather than a business listing: the title is the
/// name, the result link is the website, and contact details come from the
/// snippet. Results without any contact detail are dropped.
pub struct SearchIndexAdapter {
    core: SourceCore,
}

impl SearchIndexAdapter {
    /// Wrap shared adapter state.
    #[must_use]
    pub fn new(core: SourceCore) -> Self {
        Self { core }
    }

    fn usable(candidate: &LeadCandidate) -> bool {
        candidate.phone.is_some() || candidate.email.is_some() || candidate.website.is_some()
    }

    fn promote_link(mut candidate: LeadCandidate) -> LeadCandidate {
        if candidate.website.is_none() {
            candidate.website = candidate.extra_fields.remove("source_url");
        }
        candidate
    }
}

#[async_trait]
impl SourceAdapter for SearchIndexAdapter {
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

        let candidates = page
            .candidates
            .into_iter()
            .map(Self::promote_link)
            .filter(Self::usable)
            .collect();

        let page_size = self.core.page_size();
        let next_offset = offset + page_size;
        let next_cursor = (page.items_seen > 0 && next_offset < page_size * self.core.max_pages())
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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::definition::SourceKind;
    use crate::fetcher::PageFetcher;
    use std::sync::Arc;

    fn adapter() -> SearchIndexAdapter {
        let def = definition(
            SourceKind::SearchIndex,
            "https://src.test/html/?q={niche}+{city}+{country}&s={offset}",
        );
        let fetcher: Arc<dyn PageFetcher> = Arc::new(CannedFetcher::default());
        SearchIndexAdapter::new(SourceCore::new(def, fetcher, &[]).expect("build core"))
    }

    #[test]
    fn test_result_link_becomes_website() {
        let body = r#"
            <div class="r">
                <span class="n">Koel Cafe - Home</span>
                <a class="l" href="https://koelcafe.pk/">koelcafe.pk</a>
                <p class="s">Call 0300 1234567 for reservations</p>
            </div>
            <div class="r">
                <span class="n">Top 10 coffee shops in Lahore</span>
                <p class="s">A listicle with no contact details</p>
            </div>
        "#;
        let response = FetchResponse::ok("https://src.test/html/", body);
        let page = adapter()
            .extract(&response, &query(), &Tile::city_wide(), None)
            .expect("extract page");

        // The listicle has a name but no link, phone or email.
        assert_eq!(page.candidates.len(), 1);
        let lead = &page.candidates[0];
        assert_eq!(lead.website.as_deref(), Some("https://koelcafe.pk/"));
        assert_eq!(lead.phone.as_deref(), Some("0300 1234567"));
        assert!(!lead.extra_fields.contains_key("source_url"));
        assert_eq!(page.next_cursor, Some(Cursor::position(2)));
    }

    #[test]
    fn test_empty_page_ends_sequence() {
        let response = FetchResponse::ok("https://src.test/html/", "<html></html>");
        let page = adapter()
            .extract(&response, &query(), &Tile::city_wide(), None)
            .expect("extract page");
        assert!(page.candidates.is_empty());
        assert!(page.next_cursor.is_none());
    }
}

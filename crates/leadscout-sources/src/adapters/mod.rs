//! Concrete adapter variants built from source definitions.
//!
//! Every variant shares [`SourceCore`] for templating, fetching and challenge
//! detection, and differs in how it pages and which results it keeps.

mod directory;
mod maps;
mod review_site;
mod search_index;

pub use directory::DirectoryAdapter;
pub use maps::MapsAdapter;
pub use review_site::ReviewSiteAdapter;
pub use search_index::SearchIndexAdapter;

use crate::adapter::{Cursor, SourceAdapter};
use crate::definition::{SourceDefinition, SourceKind};
use crate::error::{Result, SourceError};
use crate::extract::{looks_like_challenge, SelectorExtractor};
use crate::fetcher::{FetchResponse, PageFetcher};
use leadscout_core::{Query, SourceId, Tile};
use scraper::Selector;
use std::sync::Arc;

/// Build the variant named by the definition's `kind`.
///
/// `markers` are the global challenge markers; the definition's own markers
/// are appended.
pub fn build_adapter(
    definition: SourceDefinition,
    fetcher: Arc<dyn PageFetcher>,
    markers: &[String],
) -> Result<Arc<dyn SourceAdapter>> {
    let kind = definition.kind();
    let core = SourceCore::new(definition, fetcher, markers)?;
    let adapter: Arc<dyn SourceAdapter> = match kind {
        SourceKind::Maps => Arc::new(MapsAdapter::new(core)),
        SourceKind::ReviewSite => Arc::new(ReviewSiteAdapter::new(core)),
        SourceKind::Directory => Arc::new(DirectoryAdapter::new(core)),
        SourceKind::SearchIndex => Arc::new(SearchIndexAdapter::new(core)),
    };
    Ok(adapter)
}

/// Template position values for one request.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Position {
    /// 1-based page number
    pub page: usize,
    /// 0-based result offset
    pub offset: usize,
}

/// State shared by every variant.
pub struct SourceCore {
    definition: SourceDefinition,
    fetcher: Arc<dyn PageFetcher>,
    extractor: SelectorExtractor,
    markers: Vec<String>,
    captcha_selector: Option<Selector>,
}

impl SourceCore {
    /// Compile a definition into shared adapter state.
    pub fn new(
        definition: SourceDefinition,
        fetcher: Arc<dyn PageFetcher>,
        markers: &[String],
    ) -> Result<Self> {
        definition.validate()?;

        let extractor = SelectorExtractor::compile(
            definition.id().clone(),
            definition.source.base_url.clone(),
            &definition.selectors,
        )?;

        let captcha_selector = definition
            .challenge
            .captcha_selector
            .as_deref()
            .map(|sel| {
                Selector::parse(sel).map_err(|e| SourceError::ValidationError {
                    source_id: definition.id().to_string(),
                    reason: format!("captcha_selector does not parse: {e}"),
                })
            })
            .transpose()?;

        let mut all_markers = markers.to_vec();
        all_markers.extend(definition.challenge.markers.iter().cloned());

        Ok(Self {
            definition,
            fetcher,
            extractor,
            markers: all_markers,
            captcha_selector,
        })
    }

    /// The definition this core was built from.
    #[must_use]
    pub fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    pub(crate) fn id(&self) -> &SourceId {
        self.definition.id()
    }

    pub(crate) fn domain(&self) -> &str {
        &self.definition.source.domain
    }

    pub(crate) fn extractor(&self) -> &SelectorExtractor {
        &self.extractor
    }

    pub(crate) fn page_size(&self) -> usize {
        self.definition.pagination.page_size
    }

    pub(crate) fn max_pages(&self) -> usize {
        self.definition.pagination.max_pages
    }

    /// Numeric position stored in a cursor, or `default` for the first page.
    pub(crate) fn position(&self, cursor: Option<&Cursor>, default: usize) -> Result<usize> {
        match cursor {
            None => Ok(default),
            Some(c) => c.as_str().parse().map_err(|_| SourceError::InvalidCursor {
                source_id: self.id().to_string(),
                cursor: c.to_string(),
            }),
        }
    }

    /// Fill a URL template for one request.
    pub(crate) fn render(
        &self,
        template: &str,
        query: &Query,
        tile: &Tile,
        position: Position,
    ) -> String {
        let (lat, lon) = tile.center();
        template
            .replace("{niche}", &encode(&query.niche))
            .replace("{city}", &encode(&query.city))
            .replace("{country}", &encode(&query.country))
            .replace("{page}", &position.page.to_string())
            .replace("{offset}", &position.offset.to_string())
            .replace("{lat}", &format!("{lat:.6}"))
            .replace("{lon}", &format!("{lon:.6}"))
            .replace("{zoom}", &zoom_for(tile).to_string())
            .replace("{min_lat}", &format!("{:.6}", tile.min_lat))
            .replace("{min_lon}", &format!("{:.6}", tile.min_lon))
            .replace("{max_lat}", &format!("{:.6}", tile.max_lat))
            .replace("{max_lon}", &format!("{:.6}", tile.max_lon))
    }

    pub(crate) async fn fetch_url(&self, url: &str) -> Result<FetchResponse> {
        self.fetcher.fetch(url).await
    }

    pub(crate) fn identify_challenge(&self, response: &FetchResponse) -> bool {
        looks_like_challenge(response, &self.markers, self.captcha_selector.as_ref())
    }
}

/// Form-encode a text value for use in a URL.
fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}

/// Map zoom level that roughly fits the tile's longitude span.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn zoom_for(tile: &Tile) -> u8 {
    let span = (tile.max_lon - tile.min_lon).abs().max(1e-6);
    // Clamped to the range map sources accept.
    (360.0 / span).log2().round().clamp(3.0, 18.0) as u8
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::definition::{ChallengeRules, LeadSelectors, Pagination, SourceMetadata};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies by URL and records every request.
    #[derive(Default)]
    pub struct CannedFetcher {
        pages: HashMap<String, FetchResponse>,
        pub requests: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        pub fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), FetchResponse::ok(url, body));
            self
        }
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(url.to_string());
            Ok(self
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| FetchResponse::with_status(url, 404, "")))
        }
    }

    pub fn definition(kind: SourceKind, template: &str) -> SourceDefinition {
        SourceDefinition {
            source: SourceMetadata {
                id: SourceId::new("test-source").expect("valid source id"),
                name: "Test Source".to_string(),
                kind,
                base_url: "https://src.test".to_string(),
                domain: "src.test".to_string(),
                search_template: template.to_string(),
                viewport_template: None,
                min_delay_ms: None,
            },
            pagination: Pagination {
                page_size: 2,
                max_pages: 3,
            },
            selectors: LeadSelectors {
                result_item: ".r".to_string(),
                name: ".n".to_string(),
                address: Some(".a".to_string()),
                link: Some("a.l".to_string()),
                snippet: Some(".s".to_string()),
                next_page: None,
                ..LeadSelectors::default()
            },
            challenge: ChallengeRules::default(),
        }
    }

    pub fn item(name: &str) -> String {
        format!(r#"<div class="r"><span class="n">{name}</span><span class="a">1 Main St</span></div>"#)
    }

    pub fn query() -> Query {
        Query::new("coffee shop", "Lahore", "Pakistan", 50)
            .with_source(SourceId::new("test-source").expect("valid source id"))
    }
}

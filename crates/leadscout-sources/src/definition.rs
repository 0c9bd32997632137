//! Source definition types and structures.
//!
//! This module defines the data structures for source definitions loaded from TOML files.

use crate::error::{Result, SourceError};
use leadscout_core::SourceId;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete source definition loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Core source metadata
    pub source: SourceMetadata,

    /// Result paging limits
    #[serde(default)]
    pub pagination: Pagination,

    /// CSS selectors for result extraction
    pub selectors: LeadSelectors,

    /// Source-specific challenge detection
    #[serde(default)]
    pub challenge: ChallengeRules,
}

impl SourceDefinition {
    /// Get the source ID.
    #[must_use]
    pub fn id(&self) -> &SourceId {
        &self.source.id
    }

    /// Get the source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Get the adapter variant.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.source.kind
    }

    /// Per-source minimum delay between requests, when set.
    #[must_use]
    pub fn min_delay(&self) -> Option<Duration> {
        self.source.min_delay_ms.map(Duration::from_millis)
    }

    /// Validate the source definition for completeness and correctness.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| SourceError::ValidationError {
            source_id: self.source.id.to_string(),
            reason,
        };

        if self.source.name.trim().is_empty() {
            return Err(invalid("source name cannot be empty".to_string()));
        }

        let base = url::Url::parse(&self.source.base_url)
            .map_err(|e| invalid(format!("base_url is not a valid URL: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "base_url must be http or https, got '{}'",
                base.scheme()
            )));
        }

        if self.source.domain.trim().is_empty() {
            return Err(invalid("domain cannot be empty".to_string()));
        }

        if !self.source.search_template.contains("{niche}") {
            return Err(invalid(
                "search_template must contain the {niche} placeholder".to_string(),
            ));
        }

        if let Some(viewport) = &self.source.viewport_template {
            if !viewport.contains("{lat}") && !viewport.contains("{min_lat}") {
                return Err(invalid(
                    "viewport_template must reference the tile through {lat} or {min_lat}"
                        .to_string(),
                ));
            }
        }

        if self.pagination.page_size == 0 || self.pagination.max_pages == 0 {
            return Err(invalid(
                "pagination.page_size and pagination.max_pages must be at least 1".to_string(),
            ));
        }

        for (field, selector) in self.selectors.all() {
            Selector::parse(selector)
                .map_err(|e| invalid(format!("selector for {field} does not parse: {e}")))?;
        }

        if let Some(selector) = &self.challenge.captcha_selector {
            Selector::parse(selector)
                .map_err(|e| invalid(format!("captcha_selector does not parse: {e}")))?;
        }

        Ok(())
    }
}

/// Core source metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Unique source identifier (e.g., "google-maps", "yelp")
    pub id: SourceId,

    /// Human-readable source name
    pub name: String,

    /// Adapter variant used for this source
    pub kind: SourceKind,

    /// Base URL that relative links resolve against
    pub base_url: String,

    /// Domain consulted for robots rules and rate limiting
    pub domain: String,

    /// Search URL template.
    ///
    /// Placeholders: `{niche}`, `{city}`, `{country}`, `{page}`, `{offset}`,
    /// `{lat}`, `{lon}`, `{zoom}`, `{min_lat}`, `{min_lon}`, `{max_lat}`, `{max_lon}`.
    pub search_template: String,

    /// Template used instead of `search_template` when scanning a geographic tile
    #[serde(default)]
    pub viewport_template: Option<String>,

    /// Overrides the global minimum delay between requests
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
}

/// Adapter variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Map search scoped to a tile viewport
    Maps,
    /// Review site with offset paging
    ReviewSite,
    /// Business directory with numbered pages
    Directory,
    /// General web search used as a fallback
    SearchIndex,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Maps => "maps",
            Self::ReviewSite => "review-site",
            Self::Directory => "directory",
            Self::SearchIndex => "search-index",
        };
        f.write_str(name)
    }
}

/// Result paging limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    /// Results per page
    pub page_size: usize,
    /// Pages fetched per (source, tile) before the unit counts as exhausted
    pub max_pages: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 5,
        }
    }
}

/// CSS selectors for lead extraction.
///
/// Field selectors are evaluated relative to each `result_item` element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadSelectors {
    /// One element per result
    pub result_item: String,
    /// Business name
    pub name: String,
    /// Street address
    #[serde(default)]
    pub address: Option<String>,
    /// Phone number (text or `tel:` link)
    #[serde(default)]
    pub phone: Option<String>,
    /// Website link
    #[serde(default)]
    pub website: Option<String>,
    /// Email (text or `mailto:` link)
    #[serde(default)]
    pub email: Option<String>,
    /// Category label
    #[serde(default)]
    pub category: Option<String>,
    /// Rating text or aria-label
    #[serde(default)]
    pub rating: Option<String>,
    /// Review count text
    #[serde(default)]
    pub review_count: Option<String>,
    /// Detail link carrying place ids and coordinates
    #[serde(default)]
    pub link: Option<String>,
    /// Free text snippet searched for phones and emails
    #[serde(default)]
    pub snippet: Option<String>,
    /// Present when the source has another page
    #[serde(default)]
    pub next_page: Option<String>,
    /// Present when the search returned nothing
    #[serde(default)]
    pub no_results: Option<String>,
}

impl LeadSelectors {
    /// Every configured selector with its field name.
    #[must_use]
    pub fn all(&self) -> Vec<(&'static str, &str)> {
        let mut selectors = vec![
            ("result_item", self.result_item.as_str()),
            ("name", self.name.as_str()),
        ];
        let optional = [
            ("address", &self.address),
            ("phone", &self.phone),
            ("website", &self.website),
            ("email", &self.email),
            ("category", &self.category),
            ("rating", &self.rating),
            ("review_count", &self.review_count),
            ("link", &self.link),
            ("snippet", &self.snippet),
            ("next_page", &self.next_page),
            ("no_results", &self.no_results),
        ];
        selectors.extend(
            optional
                .into_iter()
                .filter_map(|(field, sel)| sel.as_deref().map(|s| (field, s))),
        );
        selectors
    }
}

/// Source-specific challenge detection rules, added to the global markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeRules {
    /// Extra case-insensitive body markers
    pub markers: Vec<String>,
    /// Element whose presence means a captcha is shown
    pub captcha_selector: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> SourceDefinition {
        toml::from_str(toml_str).expect("parse definition")
    }

    const VALID: &str = r#"
[source]
id = "yelp"
name = "Yelp"
kind = "review-site"
base_url = "https://www.yelp.com"
domain = "www.yelp.com"
search_template = "https://www.yelp.com/search?find_desc={niche}&find_loc={city}&start={offset}"
min_delay_ms = 3000

[pagination]
page_size = 10
max_pages = 3

[selectors]
result_item = "div.businessName"
name = "a.css-name"
address = "span.address"
rating = "div[aria-label*='star rating']"

[challenge]
markers = ["px-captcha"]
"#;

    #[test]
    fn test_parse_valid_definition() {
        let definition = parse(VALID);
        assert_eq!(definition.id().as_str(), "yelp");
        assert_eq!(definition.kind(), SourceKind::ReviewSite);
        assert_eq!(definition.min_delay(), Some(Duration::from_millis(3000)));
        assert_eq!(definition.pagination.page_size, 10);
        assert_eq!(definition.challenge.markers, vec!["px-captcha".to_string()]);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_optional_tables() {
        let definition = parse(
            r#"
[source]
id = "dir"
name = "Directory"
kind = "directory"
base_url = "https://dir.example.com"
domain = "dir.example.com"
search_template = "https://dir.example.com/{niche}/{city}?page={page}"

[selectors]
result_item = ".listing"
name = ".name"
"#,
        );
        assert_eq!(definition.pagination.max_pages, 5);
        assert!(definition.challenge.captcha_selector.is_none());
        assert!(definition.min_delay().is_none());
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_selector() {
        let mut definition = parse(VALID);
        definition.selectors.address = Some("span[[".to_string());
        let err = definition.validate().expect_err("bad selector must fail");
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_validation_rejects_missing_niche_placeholder() {
        let mut definition = parse(VALID);
        definition.source.search_template = "https://www.yelp.com/search".to_string();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_non_http_base_url() {
        let mut definition = parse(VALID);
        definition.source.base_url = "ftp://yelp.com".to_string();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_fails_to_parse() {
        let result: std::result::Result<SourceDefinition, _> =
            toml::from_str(&VALID.replace("review-site", "social-network"));
        assert!(result.is_err());
    }
}

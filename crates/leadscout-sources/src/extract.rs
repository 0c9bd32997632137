//! Shared extraction helpers used by every adapter variant.

use crate::definition::LeadSelectors;
use crate::error::{Result, SourceError};
use crate::fetcher::FetchResponse;
use leadscout_core::{LeadCandidate, Query, SourceId};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Email domains and prefixes that never belong to a real business contact.
const IGNORED_EMAIL_PATTERNS: &[&str] = &[
    "example.com",
    "test.com",
    "sample.com",
    "placeholder.com",
    "privacy@",
    "noreply@",
    "no-reply@",
    "donotreply@",
    "wix.com",
    "wordpress.com",
    "sentry.io",
];

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
        .expect("email regex is hardcoded and valid")
});

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\(?\d[\d\s().-]{5,}\d").expect("phone regex is hardcoded and valid")
});

static PLACE_HEX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!1s(0x[0-9a-f]+:0x[0-9a-f]+)").expect("place id regex is hardcoded and valid")
});

static PLACE_CID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cid=(\d+)").expect("cid regex is hardcoded and valid"));

static COORDS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").expect("coordinate regex is hardcoded and valid")
});

static RATING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)").expect("rating regex is hardcoded and valid"));

static COUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:,\d+)*)").expect("count regex is hardcoded and valid"));

/// Collapse runs of whitespace and trim.
#[must_use]
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First plausible phone number in `text`, accepting `tel:` links.
#[must_use]
pub fn extract_phone(text: &str) -> Option<String> {
    let text = text.trim().trim_start_matches("tel:");
    PHONE_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            (7..=15).contains(&digits)
        })
}

/// First business email in `text`, accepting `mailto:` links.
#[must_use]
pub fn extract_email(text: &str) -> Option<String> {
    let text = text.trim().trim_start_matches("mailto:");
    EMAIL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .find(|email| !IGNORED_EMAIL_PATTERNS.iter().any(|p| email.contains(p)))
}

/// Map place id from a link, either `!1s0x..:0x..` or `cid=<digits>`.
#[must_use]
pub fn parse_place_id(url: &str) -> Option<String> {
    PLACE_HEX_PATTERN
        .captures(url)
        .or_else(|| PLACE_CID_PATTERN.captures(url))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Coordinates from an `@lat,lon` link fragment.
#[must_use]
pub fn parse_coordinates(url: &str) -> Option<(f64, f64)> {
    let caps = COORDS_PATTERN.captures(url)?;
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lon = caps.get(2)?.as_str().parse().ok()?;
    Some((lat, lon))
}

/// Rating such as "4.5 star rating".
#[must_use]
pub fn parse_rating(text: &str) -> Option<f64> {
    RATING_PATTERN.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Review count such as "(1,234 reviews)".
#[must_use]
pub fn parse_review_count(text: &str) -> Option<u64> {
    COUNT_PATTERN
        .captures(text)?
        .get(1)?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()
}

/// Case-insensitive containment check for the optional business name filter.
#[must_use]
pub fn matches_business_name(name: &str, filter: Option<&str>) -> bool {
    match filter.map(str::trim) {
        None | Some("") => true,
        Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
    }
}

/// Resolve a possibly relative link against the source base URL.
#[must_use]
pub fn absolutize(base_url: &str, href: &str) -> String {
    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), String::from)
}

/// Default challenge check shared by all variants.
///
/// A body containing any marker (case-insensitive), a redirect to a
/// `/sorry/` or captcha path, or a matching captcha element all count.
#[must_use]
pub fn looks_like_challenge(
    response: &FetchResponse,
    markers: &[String],
    captcha_selector: Option<&Selector>,
) -> bool {
    let body = response.body.to_lowercase();
    if markers
        .iter()
        .any(|marker| !marker.is_empty() && body.contains(&marker.to_lowercase()))
    {
        return true;
    }

    let final_url = response.final_url.to_lowercase();
    if final_url != response.url.to_lowercase()
        && (final_url.contains("/sorry/") || final_url.contains("captcha"))
    {
        return true;
    }

    captcha_selector.is_some_and(|selector| {
        Html::parse_document(&response.body)
            .select(selector)
            .next()
            .is_some()
    })
}

/// Compiled selectors for one source.
#[derive(Debug)]
pub struct SelectorExtractor {
    source_id: SourceId,
    base_url: String,
    result_item: Selector,
    name: Selector,
    address: Option<Selector>,
    phone: Option<Selector>,
    website: Option<Selector>,
    email: Option<Selector>,
    category: Option<Selector>,
    rating: Option<Selector>,
    review_count: Option<Selector>,
    link: Option<Selector>,
    snippet: Option<Selector>,
    next_page: Option<Selector>,
    no_results: Option<Selector>,
}

/// Raw page extraction before it becomes candidates.
#[derive(Debug, Default)]
pub struct ExtractedPage {
    /// Candidates in document order
    pub candidates: Vec<LeadCandidate>,
    /// Result items seen, including ones dropped for missing names
    pub items_seen: usize,
    /// Whether a next-page element exists
    pub has_next_page: bool,
}

impl SelectorExtractor {
    /// Compile every selector of a definition.
    pub fn compile(
        source_id: SourceId,
        base_url: impl Into<String>,
        selectors: &LeadSelectors,
    ) -> Result<Self> {
        let required = |field: &str, sel: &str| {
            Selector::parse(sel).map_err(|e| SourceError::ValidationError {
                source_id: source_id.to_string(),
                reason: format!("selector for {field} does not parse: {e}"),
            })
        };
        let optional = |field: &str, sel: &Option<String>| {
            sel.as_deref().map(|s| required(field, s)).transpose()
        };

        Ok(Self {
            result_item: required("result_item", &selectors.result_item)?,
            name: required("name", &selectors.name)?,
            address: optional("address", &selectors.address)?,
            phone: optional("phone", &selectors.phone)?,
            website: optional("website", &selectors.website)?,
            email: optional("email", &selectors.email)?,
            category: optional("category", &selectors.category)?,
            rating: optional("rating", &selectors.rating)?,
            review_count: optional("review_count", &selectors.review_count)?,
            link: optional("link", &selectors.link)?,
            snippet: optional("snippet", &selectors.snippet)?,
            next_page: optional("next_page", &selectors.next_page)?,
            no_results: optional("no_results", &selectors.no_results)?,
            base_url: base_url.into(),
            source_id,
        })
    }

    /// Extract candidates from a result page.
    ///
    /// City, country and niche fall back to the query when the page lacks them.
    /// Items without a name are dropped, and so are names failing the query's
    /// business name filter.
    #[must_use]
    pub fn extract(&self, html: &str, query: &Query) -> ExtractedPage {
        let document = Html::parse_document(html);

        if let Some(no_results) = &self.no_results {
            if document.select(no_results).next().is_some() {
                return ExtractedPage::default();
            }
        }

        let mut page = ExtractedPage {
            has_next_page: self
                .next_page
                .as_ref()
                .is_some_and(|sel| document.select(sel).next().is_some()),
            ..ExtractedPage::default()
        };

        for item in document.select(&self.result_item) {
            page.items_seen += 1;
            let Some(candidate) = self.extract_item(&item, query) else {
                continue;
            };
            if matches_business_name(&candidate.name, query.business_name.as_deref()) {
                page.candidates.push(candidate);
            }
        }

        tracing::trace!(
            source_id = %self.source_id,
            items = page.items_seen,
            candidates = page.candidates.len(),
            "extracted result page"
        );

        page
    }

    fn extract_item(&self, item: &ElementRef<'_>, query: &Query) -> Option<LeadCandidate> {
        let name = text_of(item, Some(&self.name)).filter(|n| !n.is_empty())?;

        let mut candidate = LeadCandidate::new(self.source_id.clone(), name)
            .with_location(query.city.clone(), query.country.clone())
            .with_niche(query.niche.clone());

        if let Some(address) = text_of(item, self.address.as_ref()) {
            candidate.address = address;
        }

        candidate.phone = self
            .phone
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|el| {
                el.value()
                    .attr("href")
                    .and_then(extract_phone)
                    .or_else(|| extract_phone(&el.text().collect::<String>()))
            });

        candidate.email = self
            .email
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|el| {
                el.value()
                    .attr("href")
                    .and_then(extract_email)
                    .or_else(|| extract_email(&el.text().collect::<String>()))
            });

        candidate.website = self
            .website
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|el| el.value().attr("href"))
            .map(|href| absolutize(&self.base_url, href));

        if let Some(snippet) = text_of(item, self.snippet.as_ref()) {
            if candidate.phone.is_none() {
                candidate.phone = extract_phone(&snippet);
            }
            if candidate.email.is_none() {
                candidate.email = extract_email(&snippet);
            }
        }

        if let Some(category) = text_of(item, self.category.as_ref()) {
            candidate.extra_fields.insert("category".to_string(), category);
        }

        let rating_el = self.rating.as_ref().and_then(|sel| item.select(sel).next());
        if let Some(rating) = rating_el.and_then(|el| {
            el.value()
                .attr("aria-label")
                .and_then(parse_rating)
                .or_else(|| parse_rating(&el.text().collect::<String>()))
        }) {
            candidate
                .extra_fields
                .insert("rating".to_string(), rating.to_string());
        }

        if let Some(count) = text_of(item, self.review_count.as_ref())
            .as_deref()
            .and_then(parse_review_count)
        {
            candidate
                .extra_fields
                .insert("review_count".to_string(), count.to_string());
        }

        if let Some(href) = self
            .link
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|el| el.value().attr("href"))
        {
            let link = absolutize(&self.base_url, href);
            if let Some(place_id) = parse_place_id(&link) {
                candidate.extra_fields.insert("place_id".to_string(), place_id);
            }
            if let Some((lat, lon)) = parse_coordinates(&link) {
                candidate.extra_fields.insert("latitude".to_string(), lat.to_string());
                candidate.extra_fields.insert("longitude".to_string(), lon.to_string());
            }
            candidate.extra_fields.insert("source_url".to_string(), link);
        }

        Some(candidate)
    }
}

fn text_of(item: &ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let el = item.select(selector?).next()?;
    let text = clean_text(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceId {
        SourceId::new("maps").expect("valid source id")
    }

    fn selectors() -> LeadSelectors {
        LeadSelectors {
            result_item: ".result".to_string(),
            name: ".name".to_string(),
            address: Some(".addr".to_string()),
            phone: Some("a.phone".to_string()),
            website: Some("a.site".to_string()),
            email: Some("a.mail".to_string()),
            rating: Some(".stars".to_string()),
            review_count: Some(".reviews".to_string()),
            link: Some("a.place".to_string()),
            next_page: Some("a.next".to_string()),
            ..LeadSelectors::default()
        }
    }

    const PAGE: &str = r#"
        <div class="results">
            <div class="result">
                <span class="name">  Cafe   Aylanto </span>
                <span class="addr">MM Alam Road, Gulberg</span>
                <a class="phone" href="tel:+92 42 35756191">Call</a>
                <a class="site" href="/biz/aylanto">Site</a>
                <a class="mail" href="mailto:Info@Aylanto.pk">Mail</a>
                <div class="stars" aria-label="4.5 star rating"></div>
                <span class="reviews">(1,234 reviews)</span>
                <a class="place" href="https://www.google.com/maps/place/Aylanto/@31.5204,74.3587,17z/data=!1s0x391904:0x5b3c">Map</a>
            </div>
            <div class="result">
                <span class="name"></span>
                <span class="addr">Nameless</span>
            </div>
            <div class="result">
                <span class="name">Espresso Lab</span>
            </div>
        </div>
        <a class="next" href="?page=2">Next</a>
    "#;

    #[test]
    fn test_extract_fields() {
        let extractor = SelectorExtractor::compile(source(), "https://maps.example.com", &selectors())
            .expect("compile selectors");
        let query = Query::new("coffee shop", "Lahore", "Pakistan", 10);
        let page = extractor.extract(PAGE, &query);

        assert_eq!(page.items_seen, 3);
        assert!(page.has_next_page);
        assert_eq!(page.candidates.len(), 2);

        let first = &page.candidates[0];
        assert_eq!(first.name, "Cafe Aylanto");
        assert_eq!(first.address, "MM Alam Road, Gulberg");
        assert_eq!(first.city, "Lahore");
        assert_eq!(first.niche_category, "coffee shop");
        assert_eq!(first.phone.as_deref(), Some("+92 42 35756191"));
        assert_eq!(first.email.as_deref(), Some("info@aylanto.pk"));
        assert_eq!(first.website.as_deref(), Some("https://maps.example.com/biz/aylanto"));
        assert_eq!(first.extra_fields.get("rating").map(String::as_str), Some("4.5"));
        assert_eq!(first.extra_fields.get("review_count").map(String::as_str), Some("1234"));
        assert_eq!(
            first.extra_fields.get("place_id").map(String::as_str),
            Some("0x391904:0x5b3c")
        );
        assert_eq!(first.extra_fields.get("latitude").map(String::as_str), Some("31.5204"));
    }

    #[test]
    fn test_business_name_filter() {
        let extractor = SelectorExtractor::compile(source(), "https://maps.example.com", &selectors())
            .expect("compile selectors");
        let query = Query::new("coffee shop", "Lahore", "Pakistan", 10).with_business_name("espresso");
        let page = extractor.extract(PAGE, &query);

        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.candidates[0].name, "Espresso Lab");
    }

    #[test]
    fn test_no_results_indicator() {
        let mut sels = selectors();
        sels.no_results = Some(".empty".to_string());
        let extractor = SelectorExtractor::compile(source(), "https://maps.example.com", &sels)
            .expect("compile selectors");
        let query = Query::new("coffee shop", "Lahore", "Pakistan", 10);
        let page = extractor.extract(r#"<div class="empty">No results</div>"#, &query);
        assert!(page.candidates.is_empty());
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_phone_and_email_helpers() {
        assert_eq!(extract_phone("Call us: (042) 111-222-333 today").as_deref(), Some("(042) 111-222-333"));
        assert_eq!(extract_phone("Open 9 to 5"), None);
        assert_eq!(extract_email("write to noreply@shop.pk or sales@shop.pk").as_deref(), Some("sales@shop.pk"));
        assert_eq!(extract_email("contact@example.com"), None);
    }

    #[test]
    fn test_place_and_coordinate_parsing() {
        assert_eq!(parse_place_id("https://maps.google.com/?cid=12345").as_deref(), Some("12345"));
        assert_eq!(parse_coordinates("/maps/@-33.8688,151.2093,15z"), Some((-33.8688, 151.2093)));
        assert_eq!(parse_coordinates("/maps/place/nothing"), None);
    }

    #[test]
    fn test_challenge_detection() {
        let markers = vec!["captcha".to_string(), "unusual traffic".to_string()];

        let normal = FetchResponse::ok("https://maps.example.com/search", "<div class=result></div>");
        assert!(!looks_like_challenge(&normal, &markers, None));

        let blocked = FetchResponse::with_status(
            "https://maps.example.com/search",
            429,
            "Our systems have detected Unusual Traffic from your network",
        );
        assert!(looks_like_challenge(&blocked, &markers, None));

        let redirected = FetchResponse {
            final_url: "https://maps.example.com/sorry/index?continue=x".to_string(),
            ..normal.clone()
        };
        assert!(looks_like_challenge(&redirected, &[], None));

        let selector = Selector::parse("#px-block").expect("valid selector");
        let element = FetchResponse::ok("https://x.example.com", r#"<div id="px-block"></div>"#);
        assert!(looks_like_challenge(&element, &[], Some(&selector)));
    }

    #[test]
    fn test_business_name_filter_helper() {
        assert!(matches_business_name("Cafe Aylanto", None));
        assert!(matches_business_name("Cafe Aylanto", Some("  ")));
        assert!(matches_business_name("Cafe Aylanto", Some("AYLANTO")));
        assert!(!matches_business_name("Cafe Aylanto", Some("espresso")));
    }
}

//! Shared types used across the LeadScout workspace.
//!
//! This module defines the validated identifiers and the lead records that
//! flow from source adapters through deduplication into storage.

use crate::error::LeadScoutError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Timestamp type used throughout the application.
pub type Timestamp = DateTime<Utc>;

/// Newtype for source identifiers with validation.
///
/// Source IDs must be lowercase alphanumeric with hyphens, 1-50 characters,
/// and may not start or end with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Create a new `SourceId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID doesn't match the required format.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadScoutError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), LeadScoutError> {
        static SOURCE_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = SOURCE_REGEX.get_or_init(|| {
            Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,48}[a-z0-9])?$").expect("valid regex")
        });

        if id.is_empty() || id.len() > 50 {
            return Err(LeadScoutError::Validation(format!(
                "invalid source ID: must be 1-50 characters, got {} characters",
                id.len()
            )));
        }

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(LeadScoutError::Validation(format!(
                "invalid source ID: must be lowercase alphanumeric with hyphens, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = LeadScoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

impl FromStr for SourceId {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Southern edge
    pub min_lat: f64,
    /// Western edge
    pub min_lon: f64,
    /// Northern edge
    pub max_lat: f64,
    /// Eastern edge
    pub max_lon: f64,
}

impl Region {
    /// Create a region from its four edges.
    #[must_use]
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        (self.max_lat - self.min_lat) * (self.max_lon - self.min_lon)
    }

    /// Check that the edges are finite, ordered and within world bounds.
    pub fn validate(&self) -> Result<(), LeadScoutError> {
        let edges = [self.min_lat, self.min_lon, self.max_lat, self.max_lon];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(LeadScoutError::Validation(
                "region edges must be finite numbers".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.min_lat) || !(-90.0..=90.0).contains(&self.max_lat) {
            return Err(LeadScoutError::Validation(
                "region latitude must be within [-90, 90]".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&self.min_lon) || !(-180.0..=180.0).contains(&self.max_lon)
        {
            return Err(LeadScoutError::Validation(
                "region longitude must be within [-180, 180]".to_string(),
            ));
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(LeadScoutError::Validation(format!(
                "region is empty: ({}, {}) .. ({}, {})",
                self.min_lat, self.min_lon, self.max_lat, self.max_lon
            )));
        }
        Ok(())
    }
}

impl FromStr for Region {
    type Err = LeadScoutError;

    /// Parse `min_lat,min_lon,max_lat,max_lon`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| LeadScoutError::Validation(format!("invalid region '{s}': {e}")))?;

        match parts.as_slice() {
            [min_lat, min_lon, max_lat, max_lon] => {
                let region = Self::new(*min_lat, *min_lon, *max_lat, *max_lon);
                region.validate()?;
                Ok(region)
            }
            _ => Err(LeadScoutError::Validation(format!(
                "invalid region '{s}': expected min_lat,min_lon,max_lat,max_lon"
            ))),
        }
    }
}

/// Identifier of one tile within a tiled query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(String);

impl TileId {
    /// Tile id used when a query is not split geographically.
    pub const CITY_WIDE: &'static str = "city";

    /// Create a tile id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the tile at `row`, `col` in row-major order.
    #[must_use]
    pub fn grid(row: usize, col: usize) -> Self {
        Self(format!("r{row}c{col}"))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bounded sub-region of a query's search area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Stable id, unique within one tiling
    pub id: TileId,
    /// Southern edge
    pub min_lat: f64,
    /// Western edge
    pub min_lon: f64,
    /// Northern edge
    pub max_lat: f64,
    /// Eastern edge
    pub max_lon: f64,
}

impl Tile {
    /// The single tile used when a query has no region; sources search by city name.
    #[must_use]
    pub fn city_wide() -> Self {
        Self {
            id: TileId::new(TileId::CITY_WIDE),
            min_lat: -90.0,
            min_lon: -180.0,
            max_lat: 90.0,
            max_lon: 180.0,
        }
    }

    /// A tile covering the whole region.
    #[must_use]
    pub fn from_region(id: TileId, region: &Region) -> Self {
        Self {
            id,
            min_lat: region.min_lat,
            min_lon: region.min_lon,
            max_lat: region.max_lat,
            max_lon: region.max_lon,
        }
    }

    /// Whether this is the city-wide placeholder tile.
    #[must_use]
    pub fn is_city_wide(&self) -> bool {
        self.id.as_str() == TileId::CITY_WIDE
    }

    /// Center point as `(lat, lon)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Whether a point lies inside the tile, edges included.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// One unit of work: a single source scanning a single tile.
///
/// Serialized as `source@tile` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitKey {
    /// Source scanning the tile
    pub source: SourceId,
    /// Tile being scanned
    pub tile: TileId,
}

impl UnitKey {
    /// Create a unit key.
    #[must_use]
    pub fn new(source: SourceId, tile: TileId) -> Self {
        Self { source, tile }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.tile)
    }
}

impl FromStr for UnitKey {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, tile) = s.split_once('@').ok_or_else(|| {
            LeadScoutError::Validation(format!("invalid unit key '{s}': expected source@tile"))
        })?;
        if tile.is_empty() {
            return Err(LeadScoutError::Validation(format!(
                "invalid unit key '{s}': empty tile id"
            )));
        }
        Ok(Self::new(SourceId::new(source)?, TileId::new(tile)))
    }
}

impl TryFrom<String> for UnitKey {
    type Error = LeadScoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitKey> for String {
    fn from(key: UnitKey) -> Self {
        key.to_string()
    }
}

/// One raw observation of a business from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadCandidate {
    /// Source that produced the observation
    pub source: SourceId,
    /// Business name
    pub name: String,
    /// Street address as shown by the source
    pub address: String,
    /// City
    pub city: String,
    /// Country
    pub country: String,
    /// Phone number as shown by the source
    pub phone: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Website URL
    pub website: Option<String>,
    /// Niche or category the lead was found under
    pub niche_category: String,
    /// Source-specific fields (rating, review count, place id, coordinates)
    pub extra_fields: BTreeMap<String, String>,
    /// When the observation was made
    pub observed_at: Timestamp,
}

impl LeadCandidate {
    /// Create a candidate with only a source and name; other fields start empty.
    #[must_use]
    pub fn new(source: SourceId, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
            address: String::new(),
            city: String::new(),
            country: String::new(),
            phone: None,
            email: None,
            website: None,
            niche_category: String::new(),
            extra_fields: BTreeMap::new(),
            observed_at: Utc::now(),
        }
    }

    /// Set the address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set city and country.
    #[must_use]
    pub fn with_location(mut self, city: impl Into<String>, country: impl Into<String>) -> Self {
        self.city = city.into();
        self.country = country.into();
        self
    }

    /// Set the phone number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the website.
    #[must_use]
    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    /// Set the niche category.
    #[must_use]
    pub fn with_niche(mut self, niche: impl Into<String>) -> Self {
        self.niche_category = niche.into();
        self
    }

    /// Add a source-specific field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.insert(key.into(), value.into());
        self
    }

    /// Set the observation time.
    #[must_use]
    pub fn observed_at(mut self, at: Timestamp) -> Self {
        self.observed_at = at;
        self
    }
}

/// The deduplicated record of one real-world business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLead {
    /// Identity key; unique among the canonical leads of a job and in storage
    pub identity_key: String,
    /// Source of the first contributing candidate
    pub source: SourceId,
    /// Business name
    pub name: String,
    /// Street address
    pub address: String,
    /// City
    pub city: String,
    /// Country
    pub country: String,
    /// Phone number
    pub phone: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Website URL
    pub website: Option<String>,
    /// Niche or category
    pub niche_category: String,
    /// Source-specific fields
    pub extra_fields: BTreeMap<String, String>,
    /// Every source that contributed a candidate
    pub merge_sources: BTreeSet<SourceId>,
    /// Earliest contributing observation
    pub first_seen: Timestamp,
    /// Latest contributing observation
    pub last_seen: Timestamp,
    /// Grows with the number of corroborating sources, in (0, 1)
    pub confidence_score: f64,
}

impl CanonicalLead {
    /// Start a canonical lead from its first candidate.
    #[must_use]
    pub fn from_candidate(identity_key: impl Into<String>, candidate: &LeadCandidate) -> Self {
        let mut merge_sources = BTreeSet::new();
        merge_sources.insert(candidate.source.clone());
        Self {
            identity_key: identity_key.into(),
            source: candidate.source.clone(),
            name: candidate.name.clone(),
            address: candidate.address.clone(),
            city: candidate.city.clone(),
            country: candidate.country.clone(),
            phone: non_empty(candidate.phone.as_ref()),
            email: non_empty(candidate.email.as_ref()),
            website: non_empty(candidate.website.as_ref()),
            niche_category: candidate.niche_category.clone(),
            extra_fields: candidate.extra_fields.clone(),
            merge_sources,
            first_seen: candidate.observed_at,
            last_seen: candidate.observed_at,
            confidence_score: confidence_for(1),
        }
    }

    /// Merge a candidate into this lead; fields already set are kept.
    pub fn absorb(&mut self, candidate: &LeadCandidate) {
        fill(&mut self.name, &candidate.name);
        fill(&mut self.address, &candidate.address);
        fill(&mut self.city, &candidate.city);
        fill(&mut self.country, &candidate.country);
        fill(&mut self.niche_category, &candidate.niche_category);
        fill_opt(&mut self.phone, candidate.phone.as_ref());
        fill_opt(&mut self.email, candidate.email.as_ref());
        fill_opt(&mut self.website, candidate.website.as_ref());
        for (key, value) in &candidate.extra_fields {
            self.extra_fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.merge_sources.insert(candidate.source.clone());
        self.first_seen = self.first_seen.min(candidate.observed_at);
        self.last_seen = self.last_seen.max(candidate.observed_at);
        self.confidence_score = confidence_for(self.merge_sources.len());
    }

    /// Merge another canonical lead into this one; this lead's identity key survives.
    pub fn absorb_lead(&mut self, other: &CanonicalLead) {
        fill(&mut self.name, &other.name);
        fill(&mut self.address, &other.address);
        fill(&mut self.city, &other.city);
        fill(&mut self.country, &other.country);
        fill(&mut self.niche_category, &other.niche_category);
        fill_opt(&mut self.phone, other.phone.as_ref());
        fill_opt(&mut self.email, other.email.as_ref());
        fill_opt(&mut self.website, other.website.as_ref());
        for (key, value) in &other.extra_fields {
            self.extra_fields
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.merge_sources.extend(other.merge_sources.iter().cloned());
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.confidence_score = confidence_for(self.merge_sources.len());
    }
}

/// Confidence for a lead corroborated by `sources` distinct sources.
///
/// One source gives 0.5 and every additional source halves the remaining doubt.
#[must_use]
pub fn confidence_for(sources: usize) -> f64 {
    let exponent = i32::try_from(sources).unwrap_or(i32::MAX);
    1.0 - 0.5_f64.powi(exponent)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn fill(target: &mut String, value: &str) {
    if target.trim().is_empty() && !value.trim().is_empty() {
        *target = value.to_string();
    }
}

fn fill_opt(target: &mut Option<String>, value: Option<&String>) {
    if target.as_deref().map_or(true, |t| t.trim().is_empty()) {
        if let Some(v) = non_empty(value) {
            *target = Some(v);
        }
    }
}

/// A discovery request that drives one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Business niche, e.g. "coffee shop"
    pub niche: String,
    /// City to search
    pub city: String,
    /// Country to search
    pub country: String,
    /// Maximum number of canonical leads for the whole job
    pub limit: usize,
    /// Sources to query
    pub sources: BTreeSet<SourceId>,
    /// Keep only candidates whose name contains this text
    #[serde(default)]
    pub business_name: Option<String>,
    /// Bounding region; when absent each source searches city-wide
    #[serde(default)]
    pub region: Option<Region>,
}

impl Query {
    /// Create a query with no sources selected.
    #[must_use]
    pub fn new(
        niche: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
        limit: usize,
    ) -> Self {
        Self {
            niche: niche.into(),
            city: city.into(),
            country: country.into(),
            limit,
            sources: BTreeSet::new(),
            business_name: None,
            region: None,
        }
    }

    /// Add a source.
    #[must_use]
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.sources.insert(source);
        self
    }

    /// Add several sources.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Filter results by business name.
    #[must_use]
    pub fn with_business_name(mut self, name: impl Into<String>) -> Self {
        self.business_name = Some(name.into());
        self
    }

    /// Restrict the search to a bounding region.
    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Reject queries that cannot start.
    ///
    /// Whether the named sources exist is checked by the orchestrator.
    pub fn validate(&self) -> Result<(), LeadScoutError> {
        if self.limit == 0 {
            return Err(LeadScoutError::Validation(
                "limit must be positive".to_string(),
            ));
        }
        if self.niche.trim().is_empty() {
            return Err(LeadScoutError::Validation("niche is required".to_string()));
        }
        if self.city.trim().is_empty() {
            return Err(LeadScoutError::Validation("city is required".to_string()));
        }
        if self.sources.is_empty() {
            return Err(LeadScoutError::Validation(
                "at least one source is required".to_string(),
            ));
        }
        if let Some(region) = &self.region {
            region.validate()?;
        }
        Ok(())
    }
}

//! LeadScout Sources - Pluggable lead sources.
//!
//! This crate turns TOML source definitions into adapters that the scanner
//! drives. It covers loading and validating definitions, fetching pages, and
//! extracting lead candidates from them.
//!
//! # Architecture
//!
//! - **Definition Types** ([`definition`]): Source metadata, paging and selectors
//! - **Loader** ([`loader`]): TOML file loading from `source-definitions/`
//! - **Registry** ([`registry`]): `SourceId` to adapter lookup
//! - **Adapter Contract** ([`adapter`]): `SourceAdapter` and the `Discovery` walk
//! - **Adapters** ([`adapters`]): Maps, review site, directory and search index variants
//! - **Fetcher** ([`fetcher`]): `PageFetcher` capability and its reqwest implementation
//! - **Extraction** ([`extract`]): Selector-driven parsing and challenge detection
//!
//! # Example
//!
//! ```rust,no_run
//! use leadscout_core::{AppConfig, SourceId};
//! use leadscout_sources::{HttpFetcher, SourceLoader, SourceRegistry};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let fetcher = Arc::new(HttpFetcher::new(&config.scanning)?);
//! let loader = SourceLoader::with_default_dir()?;
//! let registry = SourceRegistry::load_from(&loader, fetcher, &config.challenge.markers)?;
//!
//! let maps = registry.get(&SourceId::new("google-maps")?)?;
//! println!("domain: {}", maps.domain());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod adapter;
pub mod adapters;
pub mod definition;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod loader;
pub mod registry;

// Re-export commonly used types
pub use adapter::{Cursor, Discovery, DiscoveryStep, SourceAdapter, SourcePage};
pub use adapters::{
    build_adapter, DirectoryAdapter, MapsAdapter, ReviewSiteAdapter, SearchIndexAdapter,
    SourceCore,
};
pub use definition::{
    ChallengeRules, LeadSelectors, Pagination, SourceDefinition, SourceKind, SourceMetadata,
};
pub use error::{Result, SourceError};
pub use fetcher::{FetchResponse, HttpFetcher, PageFetcher};
pub use loader::SourceLoader;
pub use registry::SourceRegistry;

//! LeadScout Core - Foundation crate for the LeadScout lead discovery workspace.
//!
//! This crate provides shared types, error handling and configuration management
//! that all other LeadScout crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared domain types (`SourceId`, `LeadCandidate`, `CanonicalLead`, `Query`, `Tile`)
//!
//! # Example
//!
//! ```rust
//! use leadscout_core::{AppConfig, Query, SourceId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert!(config.scanning.respect_robots_txt);
//!
//! let query = Query::new("coffee shop", "Lahore", "Pakistan", 10)
//!     .with_source(SourceId::new("maps")?);
//! query.validate()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, ChallengeConfig, DedupConfig, ExportConfig, RateLimitConfig, ScanningConfig,
    StorageConfig, TilingConfig,
};
pub use error::{ConfigError, ConfigResult, LeadScoutError, Result};
pub use types::{
    CanonicalLead, LeadCandidate, Query, Region, SourceId, Tile, TileId, Timestamp, UnitKey,
};

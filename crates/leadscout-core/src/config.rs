//! Configuration management for LeadScout.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/leadscout/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scanning behavior settings
    pub scanning: ScanningConfig,
    /// Per-source pacing and retry backoff
    pub rate_limit: RateLimitConfig,
    /// Geographic tiling settings
    pub tiling: TilingConfig,
    /// Deduplication settings
    pub dedup: DedupConfig,
    /// Anti-bot challenge handling
    pub challenge: ChallengeConfig,
    /// Storage and checkpoint settings
    pub storage: StorageConfig,
    /// Export settings
    pub export: ExportConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Reads `config_path` when given, otherwise the default location.
    /// Supports the following environment variables:
    /// - `LEADSCOUT_CONCURRENT_UNITS`: Override the parallelism cap
    /// - `LEADSCOUT_RESPECT_ROBOTS`: Override robots.txt compliance (true/false)
    /// - `LEADSCOUT_FUZZY_THRESHOLD`: Override the fuzzy-match threshold
    /// - `LEADSCOUT_DATABASE_PATH`: Override the lead database location
    pub fn load_with_env(config_path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_overrides(config_path, |key| std::env::var(key).ok())
    }

    /// [`AppConfig::load_with_env`] with an explicit variable lookup.
    ///
    /// The result is validated after the overrides are applied.
    pub fn load_with_overrides<F>(config_path: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Unparsable values are ignored and the configured value is kept.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LEADSCOUT_CONCURRENT_UNITS") {
            if let Ok(units) = val.parse() {
                self.scanning.concurrent_units = units;
                tracing::debug!("Override scanning.concurrent_units from env: {}", units);
            }
        }

        if let Some(val) = lookup("LEADSCOUT_RESPECT_ROBOTS") {
            if let Ok(respect) = val.parse() {
                self.scanning.respect_robots_txt = respect;
                tracing::debug!("Override scanning.respect_robots_txt from env: {}", respect);
            }
        }

        if let Some(val) = lookup("LEADSCOUT_FUZZY_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                self.dedup.fuzzy_threshold = threshold;
                tracing::debug!("Override dedup.fuzzy_threshold from env: {}", threshold);
            }
        }

        if let Some(val) = lookup("LEADSCOUT_DATABASE_PATH") {
            if !val.is_empty() {
                tracing::debug!("Override storage.database_path from env: {}", val);
                self.storage.database_path = Some(PathBuf::from(val));
            }
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.scanning.concurrent_units == 0 {
            return Err(invalid("scanning.concurrent_units", "must be at least 1"));
        }
        if self.scanning.max_attempts == 0 {
            return Err(invalid("scanning.max_attempts", "must be at least 1"));
        }
        if self.rate_limit.backoff_cap_ms < self.rate_limit.backoff_base_ms {
            return Err(invalid(
                "rate_limit.backoff_cap_ms",
                "must not be smaller than backoff_base_ms",
            ));
        }
        if !(self.tiling.tile_size.is_finite() && self.tiling.tile_size > 0.0) {
            return Err(invalid("tiling.tile_size", "must be a positive number of degrees"));
        }
        if !(self.tiling.tile_overlap.is_finite() && self.tiling.tile_overlap >= 0.0) {
            return Err(invalid("tiling.tile_overlap", "must not be negative"));
        }
        if self.tiling.max_tiles == 0 {
            return Err(invalid("tiling.max_tiles", "must be at least 1"));
        }
        if !(self.dedup.fuzzy_threshold > 0.0 && self.dedup.fuzzy_threshold <= 1.0) {
            return Err(invalid("dedup.fuzzy_threshold", "must be in (0, 1]"));
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leadscout/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leadscout`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Resolve the lead database path, defaulting to `<data_dir>/leads.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("leads.db")),
        }
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("com", "leadscout", "leadscout").ok_or(ConfigError::NoConfigDir)
    }
}

/// Scanning behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Maximum number of (source, tile) units fetching at the same time
    pub concurrent_units: usize,
    /// Attempts per fetch before a unit is marked failed
    pub max_attempts: u32,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Whether to respect robots.txt
    pub respect_robots_txt: bool,
    /// User agent string
    pub user_agent: String,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            concurrent_units: 2,
            max_attempts: 3,
            request_timeout_secs: 30,
            respect_robots_txt: true,
            user_agent: "LeadScout/0.1.0 (+https://github.com/leadscout/leadscout)".to_string(),
        }
    }
}

impl ScanningConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-source pacing and retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum delay between two requests to the same source
    pub min_delay_ms: u64,
    /// Backoff delay after the first failure is `2 * backoff_base_ms`
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay
    pub backoff_cap_ms: u64,
    /// Random extra delay added to the steady-state pacing (0 disables)
    pub jitter_ms: u64,
    /// Largest robots.txt `Crawl-delay` honoured; longer ones are clamped
    pub max_crawl_delay_ms: u64,
}

impl RateLimitConfig {
    /// Ceiling on a site's `Crawl-delay`.
    #[must_use]
    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.max_crawl_delay_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1500,
            backoff_base_ms: 1000,
            backoff_cap_ms: 16_000,
            jitter_ms: 500,
            max_crawl_delay_ms: 60_000,
        }
    }
}

/// Geographic tiling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Whether large regions are split at all
    pub enabled: bool,
    /// Tile edge length in degrees
    pub tile_size: f64,
    /// Extra margin in degrees added around each tile
    pub tile_overlap: f64,
    /// Largest tile count a single query may produce
    pub max_tiles: usize,
    /// Regions with an area (deg²) at or below this are fetched as one tile
    pub max_single_fetch_area: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tile_size: 0.1,
            tile_overlap: 0.01,
            max_tiles: 100,
            max_single_fetch_area: 0.01,
        }
    }
}

/// Deduplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Token-set similarity at or above which same-city names merge
    pub fuzzy_threshold: f64,
    /// Business suffixes removed during name normalization
    pub business_suffixes: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            business_suffixes: [
                "inc",
                "incorporated",
                "llc",
                "ltd",
                "limited",
                "co",
                "corp",
                "corporation",
                "company",
                "pvt",
                "plc",
                "gmbh",
                "llp",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Anti-bot challenge handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// How long a suspended unit waits for manual resolution
    pub resolution_timeout_secs: u64,
    /// Case-insensitive body markers that indicate a challenge page
    pub markers: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            resolution_timeout_secs: 600,
            markers: [
                "g-recaptcha",
                "recaptcha",
                "captcha",
                "verify you are human",
                "unusual traffic",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

impl ChallengeConfig {
    /// Resolution timeout as a `Duration`.
    #[must_use]
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }
}

/// Storage and checkpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Lead database path (defaults to `<data_dir>/leads.db`)
    pub database_path: Option<PathBuf>,
    /// Write checkpoints as JSON files here instead of into the database
    pub checkpoint_dir: Option<PathBuf>,
    /// Keep checkpoints of completed jobs for audit
    pub retain_completed_checkpoints: bool,
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory export files are written to
    pub output_dir: PathBuf,
    /// Formats written after a run (`csv`, `json`)
    pub formats: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data"),
            formats: vec!["csv".to_string(), "json".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scanning.concurrent_units, 2);
        assert_eq!(config.scanning.max_attempts, 3);
        assert!(config.scanning.respect_robots_txt);
        assert!((config.dedup.fuzzy_threshold - 0.85).abs() < f64::EPSILON);
        assert!((config.tiling.tile_size - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.challenge.markers.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scanning]"));
        assert!(toml_str.contains("[rate_limit]"));
        assert!(toml_str.contains("[dedup]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.rate_limit.min_delay_ms, config.rate_limit.min_delay_ms);
    }

    #[test]
    fn test_config_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.scanning.concurrent_units = 1;
        config.dedup.fuzzy_threshold = 0.9;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.scanning.concurrent_units, 1);
        assert!((loaded.dedup.fuzzy_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded =
            AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load missing config");
        assert_eq!(loaded.scanning.concurrent_units, 2);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LEADSCOUT_CONCURRENT_UNITS", "3"),
            ("LEADSCOUT_RESPECT_ROBOTS", "false"),
            ("LEADSCOUT_FUZZY_THRESHOLD", "0.9"),
            ("LEADSCOUT_DATABASE_PATH", "/tmp/leads.db"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.scanning.concurrent_units, 3);
        assert!(!config.scanning.respect_robots_txt);
        assert!((config.dedup.fuzzy_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(
            config.storage.database_path,
            Some(PathBuf::from("/tmp/leads.db"))
        );
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| {
            (key == "LEADSCOUT_CONCURRENT_UNITS").then(|| "many".to_string())
        });
        assert_eq!(config.scanning.concurrent_units, 2);
    }

    #[test]
    fn test_load_with_overrides_applies_lookup_to_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, "[scanning]\nconcurrent_units = 4\n").expect("write config file");

        let loaded = AppConfig::load_with_overrides(Some(&config_path), |key| {
            (key == "LEADSCOUT_RESPECT_ROBOTS").then(|| "false".to_string())
        })
        .expect("load config");
        assert_eq!(loaded.scanning.concurrent_units, 4);
        assert!(!loaded.scanning.respect_robots_txt);
    }

    #[test]
    fn test_load_with_overrides_validates_the_result() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let result = AppConfig::load_with_overrides(Some(&config_path), |key| {
            (key == "LEADSCOUT_FUZZY_THRESHOLD").then(|| "1.5".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "dedup.fuzzy_threshold"
        ));
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[scanning]
concurrent_units = 1

[dedup]
fuzzy_threshold = 0.8
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.scanning.concurrent_units, 1);
        assert!((config.dedup.fuzzy_threshold - 0.8).abs() < f64::EPSILON);
        // These should be defaults
        assert_eq!(config.scanning.max_attempts, 3);
        assert_eq!(config.rate_limit.backoff_cap_ms, 16_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.dedup.fuzzy_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "dedup.fuzzy_threshold"
        ));

        let mut config = AppConfig::default();
        config.scanning.concurrent_units = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.backoff_cap_ms = 10;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tiling.tile_size = 0.0;
        assert!(config.validate().is_err());
    }
}

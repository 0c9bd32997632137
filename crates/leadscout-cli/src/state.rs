//! Shared wiring for subcommands.

use crate::Cli;
use anyhow::{Context, Result};
use leadscout_core::AppConfig;
use leadscout_db::{CheckpointStore, Database, FileCheckpointStore, LeadStore};
use leadscout_scanner::{JobManager, Orchestrator};
use leadscout_sources::{HttpFetcher, PageFetcher, SourceLoader, SourceRegistry};
use std::sync::Arc;

/// Load configuration from `--config` or the default location, with
/// environment overrides applied.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load_with_env(cli.config.as_deref()).with_context(|| {
        match &cli.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load config".to_string(),
        }
    })?;
    if let Some(db) = &cli.db {
        config.storage.database_path = Some(db.clone());
    }
    Ok(config)
}

/// Open the lead database named by the configuration.
pub async fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.database_path()?;
    tracing::debug!("Lead database: {}", path.display());
    Database::open(&path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))
}

/// Load every source definition into a registry.
pub fn load_registry(
    cli: &Cli,
    config: &AppConfig,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<SourceRegistry> {
    let loader = match &cli.sources_dir {
        Some(dir) => SourceLoader::new(dir.clone())?,
        None => SourceLoader::with_default_dir()?,
    };
    tracing::debug!("Source definitions: {}", loader.dir().display());
    let registry = SourceRegistry::load_from(&loader, fetcher, &config.challenge.markers)?;
    Ok(registry)
}

/// Everything a discovery job needs.
pub struct AppState {
    /// Effective configuration
    pub config: AppConfig,
    /// Lead database
    pub database: Database,
    /// Job control surface
    pub jobs: JobManager,
}

impl AppState {
    /// Wire the orchestrator and job manager from `config`.
    pub async fn open(cli: &Cli, config: AppConfig) -> Result<Self> {
        let database = open_database(&config).await?;
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.scanning)?);
        let registry = load_registry(cli, &config, Arc::clone(&fetcher))?;

        let checkpoints: Arc<dyn CheckpointStore> = match &config.storage.checkpoint_dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir.clone())?),
            None => Arc::new(database.clone()),
        };
        let store: Arc<dyn LeadStore> = Arc::new(database.clone());

        let orchestrator = Orchestrator::new(registry, fetcher, store, checkpoints, config.clone());
        let jobs = JobManager::new(Arc::new(orchestrator)).with_database(database.clone());

        Ok(Self {
            config,
            database,
            jobs,
        })
    }
}

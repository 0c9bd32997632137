//! `sources`: list the loaded source definitions.

use crate::state::{load_config, load_registry};
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use leadscout_sources::{HttpFetcher, PageFetcher};
use serde_json::json;
use std::sync::Arc;

/// Arguments of `leadscout sources`.
#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl SourcesArgs {
    /// Print every registered source.
    pub fn execute(&self, cli: &Cli) -> Result<()> {
        let config = load_config(cli)?;
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.scanning)?);
        let registry = load_registry(cli, &config, fetcher)?;
        let definitions = registry.definitions();

        if self.json {
            let listing: Vec<_> = definitions
                .iter()
                .map(|d| {
                    json!({
                        "id": d.id().to_string(),
                        "name": d.name(),
                        "kind": d.kind().to_string(),
                        "domain": d.source.domain,
                        "min_delay_ms": d.source.min_delay_ms,
                        "max_pages": d.pagination.max_pages,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&listing)
                    .context("Failed to serialize sources to JSON")?
            );
            return Ok(());
        }

        println!("Found {} sources:\n", definitions.len());
        for d in &definitions {
            println!(
                "{:<16} | {:<12} | {:<24} | {}",
                d.id().to_string(),
                d.kind().to_string(),
                d.source.domain,
                d.name()
            );
        }
        Ok(())
    }
}

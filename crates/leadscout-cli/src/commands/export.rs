//! `export` and `stats`: read back stored leads.

use crate::state::{load_config, open_database};
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use leadscout_core::SourceId;
use leadscout_db::{ExportFormat, LeadExporter, LeadFilter, LeadStore};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Arguments of `leadscout export`.
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output format
    #[arg(long, default_value = "csv")]
    pub format: ExportFormat,

    /// Only leads in this city
    #[arg(long)]
    pub city: Option<String>,

    /// Only leads in this niche
    #[arg(long)]
    pub niche: Option<String>,

    /// Only leads this source contributed to
    #[arg(long)]
    pub source: Option<String>,

    /// Only leads at or above this confidence
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Directory to write to (overrides `export.output_dir`)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl ExportArgs {
    fn filter(&self) -> Result<LeadFilter> {
        let source = self
            .source
            .as_deref()
            .map(SourceId::new)
            .transpose()
            .context("invalid --source")?;
        Ok(LeadFilter {
            city: self.city.clone(),
            niche: self.niche.clone(),
            source,
            min_confidence: self.min_confidence,
            limit: None,
        })
    }

    /// Write the matching leads to a file.
    pub async fn execute(&self, cli: &Cli) -> Result<()> {
        let config = load_config(cli)?;
        let filter = self.filter()?;
        let db = open_database(&config).await?;

        let leads = db.query(&filter).await?;
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| config.export.output_dir.clone());
        let path = LeadExporter::new(dir).export(&leads, self.format, Some(&filter))?;
        println!("Exported {} leads to {}", leads.len(), path.display());
        Ok(())
    }
}

/// Arguments of `leadscout stats`.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

impl StatsArgs {
    /// Print lead counts.
    pub async fn execute(&self, cli: &Cli) -> Result<()> {
        let config = load_config(cli)?;
        let db = open_database(&config).await?;
        let stats = db.stats().await?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).context("Failed to serialize stats to JSON")?
            );
            return Ok(());
        }

        println!("Total leads: {}", stats.total);
        print_group("By city", &stats.by_city);
        print_group("By niche", &stats.by_niche);
        print_group("By source", &stats.by_source);
        Ok(())
    }
}

fn print_group(title: &str, counts: &BTreeMap<String, u64>) {
    if counts.is_empty() {
        return;
    }
    println!("\n{title}:");
    let width = counts.keys().map(String::len).max().unwrap_or(0);
    for (key, count) in counts {
        println!("  {key:<width$}  {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn export_args(args: &[&str]) -> ExportArgs {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            crate::Commands::Export(args) => args,
            other => panic!("expected export, got {other:?}"),
        }
    }

    #[test]
    fn test_export_filter_from_flags() {
        let args = export_args(&[
            "leadscout", "export", "--format", "json", "--city", "Lahore", "--source", "yelp",
        ]);
        assert_eq!(args.format, ExportFormat::Json);

        let filter = args.filter().expect("filter");
        assert_eq!(filter.city.as_deref(), Some("Lahore"));
        assert!(filter.niche.is_none());
        assert_eq!(filter.source.map(|s| s.to_string()), Some("yelp".to_string()));
    }

    #[test]
    fn test_export_defaults_to_csv() {
        let args = export_args(&["leadscout", "export"]);
        assert_eq!(args.format, ExportFormat::Csv);
        assert!(args.filter().expect("filter").source.is_none());
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["leadscout", "export", "--format", "xml"]).is_err());
    }
}

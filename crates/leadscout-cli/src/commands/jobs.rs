//! `jobs`: list recorded discovery jobs.

use crate::state::{load_config, open_database};
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use leadscout_db::scan_jobs;

/// Arguments of `leadscout jobs`.
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Number of most recent jobs to show
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl JobsArgs {
    /// List jobs, newest first.
    pub async fn execute(&self, cli: &Cli) -> Result<()> {
        let config = load_config(cli)?;
        let db = open_database(&config).await?;
        let jobs = scan_jobs::list_scan_jobs(db.pool(), self.limit).await?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&jobs).context("Failed to serialize jobs to JSON")?
            );
            return Ok(());
        }

        if jobs.is_empty() {
            println!("No jobs recorded.");
            return Ok(());
        }
        println!(
            "{:<36}  {:<9}  {:<16}  {:>7}  {:>6}  {:>5}  QUERY",
            "ID", "STATUS", "STARTED", "UNITS", "LEADS", "DUPS"
        );
        for job in jobs {
            let c = job.counters;
            let units = format!("{}/{}", c.units_processed, c.units_total);
            println!(
                "{:<36}  {:<9}  {:<16}  {:>7}  {:>6}  {:>5}  {} in {}, {}",
                job.id,
                job.status.to_string(),
                job.started_at.format("%Y-%m-%d %H:%M"),
                units,
                c.inserted,
                c.skipped_duplicates,
                job.query.niche,
                job.query.city,
                job.query.country,
            );
            if let Some(message) = &job.error_message {
                println!("    error: {message}");
            }
        }
        Ok(())
    }
}

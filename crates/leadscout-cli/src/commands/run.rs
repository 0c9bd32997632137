//! `run` and `resume`: start a job and follow it until it finishes.

use crate::state::{load_config, AppState};
use crate::Cli;
use anyhow::{bail, Context, Result};
use clap::Args;
use leadscout_core::{Query, Region, SourceId};
use leadscout_db::{ExportFormat, LeadExporter, LeadFilter, LeadStore};
use leadscout_scanner::{JobManager, JobResult};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Arguments of `leadscout run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Business niche, e.g. "coffee shop"
    #[arg(long)]
    pub niche: String,

    /// City to search
    #[arg(long)]
    pub city: String,

    /// Country to search
    #[arg(long)]
    pub country: String,

    /// Maximum number of leads
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Source to query (repeatable)
    #[arg(long = "source", required = true)]
    pub sources: Vec<String>,

    /// Keep only businesses whose name contains this text
    #[arg(long)]
    pub business_name: Option<String>,

    /// Bounding box as min_lat,min_lon,max_lat,max_lon
    #[arg(long, value_parser = parse_bbox)]
    pub bbox: Option<Region>,

    /// Tile edge length in degrees
    #[arg(long)]
    pub tile_size: Option<f64>,

    /// Export the job's leads when it finishes
    #[arg(long)]
    pub export: Option<ExportFormat>,
}

impl RunArgs {
    fn query(&self) -> Result<Query> {
        let mut query = Query::new(&self.niche, &self.city, &self.country, self.limit);
        for source in &self.sources {
            let id = SourceId::new(source.as_str())
                .with_context(|| format!("invalid source id '{source}'"))?;
            query = query.with_source(id);
        }
        if let Some(name) = &self.business_name {
            query = query.with_business_name(name);
        }
        if let Some(region) = self.bbox {
            query = query.with_region(region);
        }
        Ok(query)
    }

    /// Run the job.
    pub async fn execute(&self, cli: &Cli) -> Result<()> {
        let mut config = load_config(cli)?;
        if let Some(tile_size) = self.tile_size {
            config.tiling.tile_size = tile_size;
            config.validate().context("invalid --tile-size")?;
        }
        let query = self.query()?;
        let state = AppState::open(cli, config).await?;

        let job_id = state.jobs.start(query.clone()).await?;
        println!("Started job {job_id}");
        let result = follow(&state.jobs, &job_id).await?;
        print_result(&result);

        if let Some(format) = self.export {
            let filter = LeadFilter {
                city: Some(query.city.clone()),
                niche: Some(query.niche.clone()),
                ..LeadFilter::default()
            };
            let leads = state.database.query(&filter).await?;
            let exporter = LeadExporter::new(&state.config.export.output_dir);
            let path = exporter.export(&leads, format, Some(&filter))?;
            println!("Exported {} leads to {}", leads.len(), path.display());
        }
        Ok(())
    }
}

/// Arguments of `leadscout resume`.
#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Id of the job to resume
    pub job_id: String,
}

impl ResumeArgs {
    /// Resume the job.
    pub async fn execute(&self, cli: &Cli) -> Result<()> {
        let config = load_config(cli)?;
        let state = AppState::open(cli, config).await?;

        let job_id = state.jobs.resume(&self.job_id).await?;
        println!("Resumed job {job_id}");
        let result = follow(&state.jobs, &job_id).await?;
        print_result(&result);
        Ok(())
    }
}

/// Parse `min_lat,min_lon,max_lat,max_lon`.
fn parse_bbox(value: &str) -> std::result::Result<Region, String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid coordinate: {e}"))?;
    let [min_lat, min_lon, max_lat, max_lon] = parts[..] else {
        return Err(format!("expected 4 comma-separated values, got {}", parts.len()));
    };
    let region = Region::new(min_lat, min_lon, max_lat, max_lon);
    region.validate().map_err(|e| e.to_string())?;
    Ok(region)
}

/// Spawn a thread that forwards each line read from stdin.
///
/// A plain thread is used so a pending read never holds up runtime shutdown.
fn stdin_lines() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Follow a job until it ends: report progress, prompt for challenge
/// resolution on stdin, and cancel on Ctrl+C.
async fn follow(jobs: &JobManager, job_id: &str) -> Result<JobResult> {
    let control = jobs.control(job_id)?;
    let mut progress = control.subscribe();
    let mut enter = stdin_lines();
    let mut prompted = false;

    let finished = jobs.wait(job_id);
    tokio::pin!(finished);

    loop {
        tokio::select! {
            result = &mut finished => return Ok(result?),
            changed = progress.changed() => {
                if changed.is_err() {
                    return Ok((&mut finished).await?);
                }
                let snapshot = *progress.borrow_and_update();
                tracing::debug!(
                    units = snapshot.units_processed,
                    of = snapshot.units_total,
                    leads = snapshot.leads_found,
                    "progress"
                );

                let pending = control.pending_challenges();
                if pending.is_empty() {
                    prompted = false;
                } else if !prompted {
                    prompted = true;
                    println!();
                    for challenge in &pending {
                        println!("Challenge on {} at {}", challenge.unit, challenge.url);
                    }
                    println!("Solve it in a browser, then press ENTER to resume.");
                }
            }
            Some(()) = enter.recv() => {
                let resolved = jobs.resolve_challenge(job_id)?;
                if resolved > 0 {
                    info!(job_id = %job_id, resolved, "resuming suspended units");
                    prompted = false;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_err() {
                    bail!("failed to listen for Ctrl+C");
                }
                warn!(job_id = %job_id, "Ctrl+C received; cancelling job (resume it later)");
                jobs.cancel(job_id)?;
            }
        }
    }
}

fn print_result(result: &JobResult) {
    println!();
    println!("Job {}", result.job_id);
    println!("  found:      {}", result.total_found);
    println!("  leads:      {}", result.inserted);
    println!("  duplicates: {}", result.skipped_duplicates);
    if result.dropped_over_limit > 0 {
        println!("  over limit: {}", result.dropped_over_limit);
    }
    println!(
        "  units:      {}/{} completed",
        result.units_completed, result.units_total
    );
    println!("  duration:   {:.1}s", result.duration.as_secs_f64());
    for failure in &result.failed_units {
        println!("  failed {}: {}", failure.unit, failure.reason);
    }
    for error in &result.storage_errors {
        println!("  storage: {error}");
    }
    if result.cancelled {
        println!("Cancelled. Resume with: leadscout resume {}", result.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_bbox() {
        let region = parse_bbox("31.40, 74.20, 31.60, 74.50").expect("valid bbox");
        assert!((region.min_lat - 31.40).abs() < 1e-9);
        assert!((region.max_lon - 74.50).abs() < 1e-9);

        assert!(parse_bbox("31.40,74.20,31.60").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        // Min above max.
        assert!(parse_bbox("31.60,74.20,31.40,74.50").is_err());
    }

    #[test]
    fn test_run_args_build_query() {
        let cli = Cli::try_parse_from([
            "leadscout",
            "run",
            "--niche",
            "coffee shop",
            "--city",
            "Lahore",
            "--country",
            "Pakistan",
            "--limit",
            "10",
            "--source",
            "google-maps",
            "--source",
            "yelp",
            "--export",
            "csv",
        ])
        .expect("parse");
        let crate::Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let query = args.query().expect("query");
        assert_eq!(query.limit, 10);
        assert_eq!(query.sources.len(), 2);
        assert!(query.region.is_none());
        assert_eq!(args.export, Some(ExportFormat::Csv));
    }

    #[test]
    fn test_run_requires_a_source() {
        let parsed = Cli::try_parse_from([
            "leadscout", "run", "--niche", "dentist", "--city", "Lahore", "--country", "Pakistan",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_invalid_source_id_is_rejected() {
        let cli = Cli::try_parse_from([
            "leadscout", "run", "--niche", "dentist", "--city", "Lahore", "--country", "Pakistan",
            "--source", "Not Valid",
        ])
        .expect("parse");
        let crate::Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.query().is_err());
    }
}

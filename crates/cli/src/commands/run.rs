//! Run command: load configuration and backfill every requested series.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use backfill_core::{AppConfig, ConfigLoader, Shutdown};
use backfill_pipeline::{Orchestrator, SourceRequest};
use backfill_sources::{RateLimiterRegistry, SourceRegistry};
use chrono::NaiveDate;
use clap::Args;
use tracing::{info, warn};

use super::report::print_summary;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path (defaults to config/Backfill.toml)
    #[arg(short, long, env = "BACKFILL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Profile overlay, merged from config/Backfill.<profile>.toml
    #[arg(short, long, conflicts_with = "config")]
    pub profile: Option<String>,

    /// First day to download (YYYY-MM-DD), overrides start_date
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last day to download, inclusive (YYYY-MM-DD), overrides end_date
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Comma-separated source ids to run (default: every enabled source)
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,
}

/// Loads the configuration named by `args` and applies its overrides.
fn load_config(args: &RunArgs) -> Result<AppConfig> {
    let mut config = match (&args.config, &args.profile) {
        (Some(path), _) => ConfigLoader::load_from(path)?,
        (None, Some(profile)) => ConfigLoader::load_with_profile(profile)?,
        (None, None) => ConfigLoader::load()?,
    };
    if args.start.is_some() {
        config.start_date = args.start;
    }
    if args.end.is_some() {
        config.end_date = args.end;
    }
    Ok(config)
}

/// Enabled sources from `config`, narrowed to `only` when it is non-empty.
fn select_requests(config: &AppConfig, only: &[String]) -> Result<Vec<SourceRequest>> {
    let requests = SourceRequest::from_config(config);
    if only.is_empty() {
        return Ok(requests);
    }

    for id in only {
        if !requests.iter().any(|r| &r.source_id == id) {
            bail!("source '{id}' is not enabled in the configuration");
        }
    }
    Ok(requests
        .into_iter()
        .filter(|r| only.contains(&r.source_id))
        .collect())
}

/// Runs the backfill.
///
/// # Errors
/// Returns an error if the configuration is invalid or the run cannot
/// write its outputs. Individual job failures only appear in the report.
pub async fn run_backfill(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let (start, end) = config.date_range()?;
    let requests = select_requests(&config, &args.sources)?;
    if requests.is_empty() {
        bail!("no enabled sources to run");
    }

    let sources = SourceRegistry::from_config(&config);
    let limiters = Arc::new(
        RateLimiterRegistry::from_config(&config).context("invalid rate limits")?,
    );

    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling in-flight jobs");
            trigger.trigger();
        }
    });

    info!(
        %start,
        %end,
        sources = requests.len(),
        output_dir = %config.output_dir.display(),
        "Starting backfill"
    );

    let fetcher = config.fetcher.clone();
    let orchestrator = Orchestrator::new(config, sources, limiters, fetcher).with_shutdown(shutdown);
    let report = orchestrator.run(&requests, start, end).await?;

    print_summary(&report);
    if report.totals.failed > 0 {
        warn!(failed = report.totals.failed, "Some jobs failed, see the report");
    }
    Ok(())
}

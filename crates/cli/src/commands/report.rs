//! Report command: summarize a saved run report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use backfill_core::Report;
use backfill_data::CsvStorage;
use clap::Args;

/// Arguments for the report command.
#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Path to a `report_<start>_<end>.json` file
    pub path: PathBuf,

    /// Print the raw JSON instead of the summary
    #[arg(long, default_value = "false")]
    pub json: bool,
}

/// One line per job, then per join, then the totals.
pub fn format_summary(report: &Report) -> String {
    let mut lines = vec![format!(
        "Backfill {} .. {}",
        report.date_range.start, report.date_range.end
    )];

    for result in &report.per_source {
        let line = match &result.error {
            None => format!("  ok    {:<32} {:>8} rows", result.key(), result.record_count),
            Some(e) => format!("  FAIL  {:<32} {} ({e})", result.key(), e.name()),
        };
        lines.push(line);
    }

    for derived in &report.derived {
        let line = match &derived.error {
            None => format!("  join  {:<32} {:>8} rows", derived.name, derived.record_count),
            Some(e) => format!("  skip  {:<32} {} ({e})", derived.name, e.name()),
        };
        lines.push(line);
    }

    let totals = &report.totals;
    lines.push(format!(
        "Total: {}, Succeeded: {}, Failed: {}, Records: {}",
        totals.total, totals.succeeded, totals.failed, totals.records
    ));
    lines.join("\n")
}

pub fn print_summary(report: &Report) {
    println!("{}", format_summary(report));
}

/// Prints a saved report.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a report.
pub fn run_report(args: &ReportArgs) -> Result<()> {
    let report = CsvStorage::read_report(&args.path)
        .with_context(|| format!("failed to load report {}", args.path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

//! Sources command: list the registered adapters.

use anyhow::Result;
use backfill_core::Period;
use backfill_sources::{SourceInfo, SourceRegistry};
use clap::Args;

/// Arguments for the sources command.
#[derive(Args, Debug, Clone)]
pub struct SourcesArgs {
    /// Output period used to build period-dependent adapters
    #[arg(long, default_value = "1h")]
    pub period: Period,

    /// Print as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,
}

fn format_table(sources: &[SourceInfo]) -> String {
    let mut lines = vec![format!(
        "{:<20} {:<6} {:<14} {:<7} {}",
        "SOURCE", "KIND", "PAGINATION", "PERIOD", "AVAILABLE FROM"
    )];
    for info in sources {
        lines.push(format!(
            "{:<20} {:<6} {:<14} {:<7} {}",
            info.id,
            info.kind.as_str(),
            info.pagination.as_str(),
            info.period.as_str(),
            info.min_start_date
        ));
    }
    lines.join("\n")
}

/// # Errors
/// Returns an error only if JSON encoding fails.
pub fn run_sources(args: &SourcesArgs) -> Result<()> {
    let sources = SourceRegistry::builtin(args.period).list();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
    } else {
        println!("{}", format_table(&sources));
    }
    Ok(())
}

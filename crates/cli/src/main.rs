use clap::{Parser, Subcommand};

mod commands;

use commands::{ReportArgs, RunArgs, SourcesArgs};

#[derive(Parser)]
#[command(name = "backfill")]
#[command(about = "Historical market-data backfill pipeline", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true, env = "BACKFILL_LOG_FILE")]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every configured series and write the run report
    Run(RunArgs),
    /// List the registered source adapters
    Sources(SourcesArgs),
    /// Print a summary of a saved run report
    Report(ReportArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_backfill(args).await?,
        Commands::Sources(args) => commands::run_sources(&args)?,
        Commands::Report(args) => commands::run_report(&args)?,
    }

    Ok(())
}

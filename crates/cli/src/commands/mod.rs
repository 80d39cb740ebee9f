//! CLI commands for the backfill pipeline.

pub mod report;
pub mod run;
pub mod sources;

pub use report::{run_report, ReportArgs};
pub use run::{run_backfill, RunArgs};
pub use sources::{run_sources, SourcesArgs};

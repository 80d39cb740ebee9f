//! Orchestration of backfill runs.
//!
//! An [`Orchestrator`] turns source requests into one job per
//! (source, instrument), drains each through its adapter, reconciles the
//! result per series kind, writes the CSV outputs and joins, and returns a
//! [`backfill_core::Report`].

pub mod job;
pub mod orchestrator;
pub mod reconcile;

pub use job::{Job, JobState};
pub use orchestrator::{JobContext, Orchestrator, SourceRequest};
pub use reconcile::{check_coverage, reconcile, require_full_coverage, window_bounds};

//! Series transforms and storage for the backfill pipeline.
//!
//! This crate provides:
//! - Normalization helpers shared by source adapters
//! - Regular-grid gap filling with per-kind policies
//! - Index-to-rate interpolation
//! - Nearest-time joins
//! - CSV and report storage

pub mod csv_storage;
pub mod gap_fill;
pub mod interpolate;
pub mod join;
pub mod normalize;

pub use csv_storage::CsvStorage;
pub use gap_fill::{fill_gaps, fill_gaps_with_stats, FillPolicy, GapFillStats};
pub use interpolate::{interpolate_rates, InterpolationConfig};
pub use join::nearest_join;
pub use normalize::{collect_records, CollectedRecords, RecordBuilder};

//! Index-based rate interpolation.
//!
//! Lending protocols publish cumulative compounding indices at coarse
//! intervals. Between two snapshots the index is interpolated linearly onto
//! the target grid, and each step's growth factor `g = i[t] / i[t-1]` is
//! annualized (`apy = g^ppy - 1`) and expressed as a continuously compounded
//! rate (`ccr = ln(1 + apy)`). Because growth factors are ratios of
//! consecutive index values, their product between any two snapshots
//! telescopes back to the snapshot ratio.

use backfill_core::{ErrorKind, Period, Result, Series, SeriesKind, TimePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    /// Output grid spacing
    pub period: Period,
    /// Cumulative index fields, named `X_index`
    pub index_fields: Vec<String>,
    /// Point-in-time fields carried forward from the latest snapshot
    pub snapshot_fields: Vec<String>,
    /// Quantities interpolated linearly
    pub extensive_fields: Vec<String>,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            period: Period::OneHour,
            index_fields: vec!["liquidity_index".to_string(), "borrow_index".to_string()],
            snapshot_fields: vec![
                "liquidity_rate".to_string(),
                "borrow_rate".to_string(),
                "utilization".to_string(),
            ],
            extensive_fields: vec!["total_supplied".to_string(), "total_borrowed".to_string()],
        }
    }
}

impl InterpolationConfig {
    #[must_use]
    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub fn with_index_fields(mut self, fields: &[&str]) -> Self {
        self.index_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }
}

/// Prefix shared by the derived fields of `X_index`.
fn stem(field: &str) -> &str {
    field.strip_suffix("_index").unwrap_or(field)
}

/// Converts index snapshots into a regular series of compounding rates.
///
/// # Errors
/// - `CoverageGap` if fewer than two snapshots (or grid points) exist
/// - `MalformedRecord` if an index field is missing, non-positive or decreasing
pub fn interpolate_rates(series: &Series, config: &InterpolationConfig) -> Result<Series> {
    let snapshots = series.points();
    let meta = series.meta().derive(SeriesKind::Rate, "ratio");

    let (first, last) = match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) if snapshots.len() >= 2 => (first, last),
        (Some(only), _) => {
            return Err(ErrorKind::CoverageGap {
                from: only.timestamp,
                to: only.timestamp,
            })
        }
        _ => {
            return Err(ErrorKind::CoverageGap {
                from: DateTime::<Utc>::UNIX_EPOCH,
                to: DateTime::<Utc>::UNIX_EPOCH,
            })
        }
    };

    validate_indices(snapshots, &config.index_fields)?;

    let period = config.period;
    let grid_start = period.ceil(first.timestamp);
    let grid_end = period.floor(last.timestamp);
    if grid_start >= grid_end {
        return Err(ErrorKind::CoverageGap {
            from: first.timestamp,
            to: last.timestamp,
        });
    }

    let ppy = period.periods_per_year();
    let mut out: Vec<TimePoint> = Vec::new();
    let mut previous: Option<TimePoint> = None;
    let mut j = 0usize;

    let mut ts = grid_start;
    while ts <= grid_end {
        while j + 2 < snapshots.len() && snapshots[j + 1].timestamp <= ts {
            j += 1;
        }
        let lo = &snapshots[j];
        let hi = &snapshots[j + 1];
        let span = (hi.timestamp - lo.timestamp).num_seconds() as f64;
        let frac = ((ts - lo.timestamp).num_seconds() as f64 / span).clamp(0.0, 1.0);
        let latest = if ts >= hi.timestamp { hi } else { lo };

        let mut point = TimePoint::new(ts);

        for field in &config.index_fields {
            if let (Some(a), Some(b)) = (lo.get(field), hi.get(field)) {
                point.set(field.clone(), lerp(a, b, frac));
            }
        }
        for field in &config.extensive_fields {
            if let (Some(a), Some(b)) = (lo.get(field), hi.get(field)) {
                point.set(field.clone(), lerp(a, b, frac));
            }
        }
        for field in &config.snapshot_fields {
            if let Some(v) = latest.get(field) {
                point.set(field.clone(), v);
            }
        }

        if let Some(prev) = &previous {
            let mut row = point.clone();
            for field in &config.index_fields {
                if let (Some(now), Some(before)) = (point.get(field), prev.get(field)) {
                    let growth = now / before;
                    let log_growth = growth.ln();
                    let stem = stem(field);
                    row.set(format!("{stem}_growth"), growth);
                    row.set(format!("{stem}_apy"), (ppy * log_growth).exp_m1());
                    row.set(format!("{stem}_ccr"), ppy * log_growth);
                }
            }
            out.push(row);
        }
        previous = Some(point);
        ts += period.duration();
    }

    debug!(
        source = %meta.source_id,
        instrument = %meta.instrument_id,
        snapshots = snapshots.len(),
        rows = out.len(),
        "Interpolated index snapshots"
    );

    Series::from_sorted(meta, out)
}

fn lerp(a: f64, b: f64, frac: f64) -> f64 {
    a + (b - a) * frac
}

fn validate_indices(snapshots: &[TimePoint], fields: &[String]) -> Result<()> {
    for field in fields {
        let mut prev: Option<f64> = None;
        for snapshot in snapshots {
            let value = snapshot.get(field).ok_or_else(|| {
                ErrorKind::malformed(format!(
                    "snapshot at {} missing {field}",
                    snapshot.timestamp.to_rfc3339()
                ))
            })?;
            if value.is_nan() || value <= 0.0 {
                return Err(ErrorKind::malformed(format!(
                    "{field} must be positive, got {value} at {}",
                    snapshot.timestamp.to_rfc3339()
                )));
            }
            if let Some(p) = prev {
                if value < p {
                    return Err(ErrorKind::malformed(format!(
                        "{field} decreased from {p} to {value} at {}",
                        snapshot.timestamp.to_rfc3339()
                    )));
                }
            }
            prev = Some(value);
        }
    }
    Ok(())
}

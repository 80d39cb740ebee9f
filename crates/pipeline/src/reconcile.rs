//! Per-kind reconciliation of a drained series onto its output grid.
//!
//! | Kind | Treatment | Full coverage |
//! |---|---|---|
//! | Ohlcv, Gas | forward fill, zero volume | no |
//! | Price | forward fill | no |
//! | Rate | gap check (reject) | yes |
//! | Index | interpolated to rates | yes |

use backfill_core::{ErrorKind, Period, Result, Series, SeriesKind};
use backfill_data::{fill_gaps_with_stats, interpolate_rates, FillPolicy, InterpolationConfig};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::debug;

/// Whether a series of `kind` must span the whole requested range.
#[must_use]
pub fn require_full_coverage(kind: SeriesKind) -> bool {
    matches!(kind, SeriesKind::Rate | SeriesKind::Index)
}

/// Inclusive fetch bounds for the dates `start..=end` at `period`.
///
/// Bars end one period before midnight after `end`. Index snapshots also
/// take the midnight after `end`, so the last day can be interpolated.
#[must_use]
pub fn window_bounds(
    kind: SeriesKind,
    period: Period,
    start: NaiveDate,
    end: NaiveDate,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let after = (end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    let to = match kind {
        SeriesKind::Index => after,
        _ => after - period.duration(),
    };
    (from, to)
}

/// Checks that `series` starts and ends on the grid bounds of `start..=end`.
///
/// # Errors
/// Returns `CoverageGap` naming the uncovered head or tail.
pub fn check_coverage(
    series: &Series,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()> {
    let expected_first = period.ceil(start);
    let expected_last = period.floor(end);

    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Err(ErrorKind::CoverageGap {
            from: expected_first,
            to: expected_last,
        });
    };
    if first.timestamp > expected_first {
        return Err(ErrorKind::CoverageGap {
            from: expected_first,
            to: first.timestamp - period.duration(),
        });
    }
    if last.timestamp < expected_last {
        return Err(ErrorKind::CoverageGap {
            from: last.timestamp + period.duration(),
            to: expected_last,
        });
    }
    Ok(())
}

/// Reconciles a raw series sampled at `native` into its output form.
///
/// `target` is the output period of interpolated rates; gap-filled kinds
/// stay on their native grid.
///
/// # Errors
/// `CoverageGap` when coverage is required and missing or when nothing at
/// all lands on the grid, or propagated gap-fill and interpolation errors.
pub fn reconcile(
    series: &Series,
    native: Period,
    target: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Series> {
    let kind = series.kind();
    if require_full_coverage(kind) {
        check_coverage(series, native, start, end)?;
    }

    match kind {
        SeriesKind::Index => {
            let config = InterpolationConfig::default().with_period(target);
            interpolate_rates(series, &config)
        }
        SeriesKind::Ohlcv | SeriesKind::Gas | SeriesKind::Price | SeriesKind::Rate => {
            let policy = FillPolicy::for_kind(kind);
            let (filled, stats) = fill_gaps_with_stats(
                series,
                native,
                native.ceil(start),
                native.floor(end),
                policy,
            )?;
            debug!(
                source = %series.meta().source_id,
                instrument = %series.meta().instrument_id,
                policy = ?policy,
                real = stats.real,
                synthesized = stats.synthesized,
                omitted_leading = stats.omitted_leading,
                "Reconciled series"
            );
            if filled.is_empty() {
                return Err(ErrorKind::CoverageGap {
                    from: native.ceil(start),
                    to: native.floor(end),
                });
            }
            Ok(filled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::{SeriesMeta, TimePoint};
    use chrono::TimeZone;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn series(kind: SeriesKind, points: Vec<TimePoint>) -> Series {
        Series::from_points(SeriesMeta::new("src", "X", "u", kind), points)
    }

    // ============================================
    // Window Tests
    // ============================================

    #[test]
    fn test_window_bounds_per_kind() {
        let (from, to) = window_bounds(SeriesKind::Gas, Period::OneHour, date(1), date(2));
        assert_eq!(from, at(0));
        assert_eq!(to, at(47));

        let (_, to) = window_bounds(SeriesKind::Rate, Period::EightHours, date(1), date(1));
        assert_eq!(to, at(16));

        let (_, to) = window_bounds(SeriesKind::Index, Period::OneDay, date(1), date(1));
        assert_eq!(to, at(24));
    }

    // ============================================
    // Coverage Tests
    // ============================================

    #[test]
    fn test_coverage_head_and_tail_gaps() {
        let rate = |h| TimePoint::new(at(h)).with("rate", 0.0001);
        let short_head = series(SeriesKind::Rate, vec![rate(8), rate(16)]);
        assert_eq!(
            check_coverage(&short_head, Period::EightHours, at(0), at(16)),
            Err(ErrorKind::CoverageGap { from: at(0), to: at(0) })
        );

        let short_tail = series(SeriesKind::Rate, vec![rate(0), rate(8)]);
        assert_eq!(
            check_coverage(&short_tail, Period::EightHours, at(0), at(16)),
            Err(ErrorKind::CoverageGap { from: at(16), to: at(16) })
        );

        let empty = series(SeriesKind::Rate, vec![]);
        assert!(check_coverage(&empty, Period::EightHours, at(0), at(16)).is_err());
    }

    #[test]
    fn test_rate_interior_gap_is_rejected() {
        let rate = |h| TimePoint::new(at(h)).with("rate", 0.0001);
        let raw = series(SeriesKind::Rate, vec![rate(0), rate(16)]);
        let err = reconcile(&raw, Period::EightHours, Period::OneHour, at(0), at(16)).unwrap_err();
        assert_eq!(err, ErrorKind::CoverageGap { from: at(8), to: at(8) });
    }

    // ============================================
    // Reconciliation Tests
    // ============================================

    #[test]
    fn test_ohlcv_short_coverage_is_filled_not_failed() {
        let bar = |h, c| TimePoint::ohlcv(at(h), c, c, c, c, 1.0);
        let raw = series(SeriesKind::Ohlcv, vec![bar(2, 10.0), bar(4, 11.0)]);
        let out = reconcile(&raw, Period::OneHour, Period::OneHour, at(0), at(5)).unwrap();

        // leading hours omitted, trailing hour carried
        assert_eq!(out.len(), 4);
        assert_eq!(out.first().unwrap().timestamp, at(2));
        assert_eq!(out.last().unwrap().close(), Some(11.0));
        assert_eq!(out.last().unwrap().get("volume"), Some(0.0));
    }

    #[test]
    fn test_empty_fill_kind_is_coverage_gap() {
        for kind in [SeriesKind::Ohlcv, SeriesKind::Gas, SeriesKind::Price] {
            let raw = series(kind, vec![]);
            let err = reconcile(&raw, Period::OneHour, Period::OneHour, at(0), at(23)).unwrap_err();
            assert_eq!(err, ErrorKind::CoverageGap { from: at(0), to: at(23) });
        }
    }

    #[test]
    fn test_index_interpolated_to_hourly() {
        let snap = |h, v: f64| {
            TimePoint::new(at(h))
                .with("liquidity_index", v)
                .with("borrow_index", v)
        };
        let raw = series(SeriesKind::Index, vec![snap(0, 1.0), snap(24, 1.01)]);
        let out = reconcile(&raw, Period::OneDay, Period::OneHour, at(0), at(24)).unwrap();

        assert_eq!(out.kind(), SeriesKind::Rate);
        assert_eq!(out.len(), 24);
        let product: f64 = out
            .points()
            .iter()
            .map(|p| p.get("liquidity_growth").unwrap())
            .product();
        assert!((product / 1.01 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_index_missing_last_snapshot_is_gap() {
        let snap = |h, v: f64| {
            TimePoint::new(at(h))
                .with("liquidity_index", v)
                .with("borrow_index", v)
        };
        let raw = series(SeriesKind::Index, vec![snap(0, 1.0), snap(24, 1.01)]);
        let err = reconcile(&raw, Period::OneDay, Period::OneHour, at(0), at(48)).unwrap_err();
        assert_eq!(err, ErrorKind::CoverageGap { from: at(48), to: at(48) });
    }
}

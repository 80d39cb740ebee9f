//! Regular-grid gap filling.

use backfill_core::{ErrorKind, Period, Result, Series, SeriesKind, TimePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a missing grid slot is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Flat bar at the last close with zero volume.
    ForwardFillZeroVolume,
    /// Carry every field forward; `volume`, when present, becomes zero.
    ForwardFill,
    /// Missing slots are an error.
    Reject,
}

impl FillPolicy {
    /// Policy used when reconciling a series of `kind`.
    #[must_use]
    pub fn for_kind(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::Ohlcv | SeriesKind::Gas => FillPolicy::ForwardFillZeroVolume,
            SeriesKind::Price => FillPolicy::ForwardFill,
            SeriesKind::Rate | SeriesKind::Index => FillPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapFillStats {
    /// Grid slots that had an observation
    pub real: usize,
    /// Grid slots produced by the policy
    pub synthesized: usize,
    /// Grid slots before the first observation, not emitted
    pub omitted_leading: usize,
}

/// Fills `series` onto the grid `start, start + period, ..., end`.
///
/// # Errors
/// Returns `CoverageGap` for the first missing run under [`FillPolicy::Reject`].
pub fn fill_gaps(
    series: &Series,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    policy: FillPolicy,
) -> Result<Series> {
    fill_gaps_with_stats(series, period, start, end, policy).map(|(filled, _)| filled)
}

/// [`fill_gaps`] with slot accounting.
///
/// # Errors
/// Returns `CoverageGap` for the first missing run under [`FillPolicy::Reject`].
pub fn fill_gaps_with_stats(
    series: &Series,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    policy: FillPolicy,
) -> Result<(Series, GapFillStats)> {
    let step = period.duration();
    let mut stats = GapFillStats::default();
    let mut out: Vec<TimePoint> = Vec::new();
    let mut last: Option<&TimePoint> = None;
    let mut missing_run: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    let mut ts = start;
    while ts <= end {
        if let Some(point) = series.get(ts) {
            if let Some((from, to)) = missing_run.take() {
                return Err(ErrorKind::CoverageGap { from, to });
            }
            out.push(point.clone());
            last = Some(point);
            stats.real += 1;
        } else if let Some(prev) = last {
            match policy {
                FillPolicy::Reject => {
                    missing_run = Some(match missing_run {
                        Some((from, _)) => (from, ts),
                        None => (ts, ts),
                    });
                }
                FillPolicy::ForwardFillZeroVolume => {
                    out.push(flat_bar(prev, ts));
                    stats.synthesized += 1;
                }
                FillPolicy::ForwardFill => {
                    out.push(carried(prev, ts));
                    stats.synthesized += 1;
                }
            }
        } else {
            stats.omitted_leading += 1;
        }
        ts += step;
    }

    if let Some((from, to)) = missing_run {
        return Err(ErrorKind::CoverageGap { from, to });
    }

    debug!(
        source = %series.meta().source_id,
        instrument = %series.meta().instrument_id,
        real = stats.real,
        synthesized = stats.synthesized,
        omitted_leading = stats.omitted_leading,
        "Gap fill complete"
    );

    let filled = Series::from_sorted(series.meta().clone(), out)?;
    Ok((filled, stats))
}

fn flat_bar(prev: &TimePoint, ts: DateTime<Utc>) -> TimePoint {
    let mut point = TimePoint {
        timestamp: ts,
        fields: prev.fields.clone(),
    };
    if let Some(close) = prev.close() {
        for name in ["open", "high", "low", "close"] {
            point.set(name, close);
        }
    }
    point.set("volume", 0.0);
    point
}

fn carried(prev: &TimePoint, ts: DateTime<Utc>) -> TimePoint {
    let mut point = TimePoint {
        timestamp: ts,
        fields: prev.fields.clone(),
    };
    if let Some(volume) = point.fields.get_mut("volume") {
        *volume = 0.0;
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::SeriesMeta;
    use chrono::{Duration, TimeZone};

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn ohlcv(points: Vec<TimePoint>) -> Series {
        Series::from_points(
            SeriesMeta::new("test", "BTCUSDT", "usdt", SeriesKind::Ohlcv),
            points,
        )
    }

    fn bar(h: i64, close: f64) -> TimePoint {
        TimePoint::ohlcv(at(h), close - 1.0, close + 1.0, close - 2.0, close, 5.0)
    }

    // ============================================
    // ForwardFillZeroVolume Tests
    // ============================================

    #[test]
    fn test_fills_interior_gap_with_flat_bar() {
        let series = ohlcv(vec![bar(0, 100.0), bar(3, 103.0)]);
        let (filled, stats) =
            fill_gaps_with_stats(&series, Period::OneHour, at(0), at(3), FillPolicy::ForwardFillZeroVolume)
                .unwrap();

        assert_eq!(filled.len(), 4);
        assert!(filled.is_regular(Period::OneHour));
        assert_eq!(stats.real, 2);
        assert_eq!(stats.synthesized, 2);

        let synthetic = filled.get(at(1)).unwrap();
        assert_eq!(synthetic.get("open"), Some(100.0));
        assert_eq!(synthetic.get("high"), Some(100.0));
        assert_eq!(synthetic.get("low"), Some(100.0));
        assert_eq!(synthetic.close(), Some(100.0));
        assert_eq!(synthetic.get("volume"), Some(0.0));

        // Real bars pass through untouched.
        assert_eq!(filled.get(at(3)).unwrap().get("volume"), Some(5.0));
    }

    #[test]
    fn test_fills_trailing_gap() {
        let series = ohlcv(vec![bar(0, 100.0)]);
        let filled =
            fill_gaps(&series, Period::OneHour, at(0), at(5), FillPolicy::ForwardFillZeroVolume).unwrap();
        assert_eq!(filled.len(), 6);
        assert_eq!(filled.last().unwrap().close(), Some(100.0));
    }

    #[test]
    fn test_leading_gap_is_omitted() {
        let series = ohlcv(vec![bar(2, 100.0), bar(3, 101.0)]);
        let (filled, stats) =
            fill_gaps_with_stats(&series, Period::OneHour, at(0), at(3), FillPolicy::ForwardFillZeroVolume)
                .unwrap();
        assert_eq!(filled.len(), 2);
        assert_eq!(filled.first().unwrap().timestamp, at(2));
        assert_eq!(stats.omitted_leading, 2);
    }

    #[test]
    fn test_off_grid_points_are_ignored() {
        let mut off = bar(1, 999.0);
        off.timestamp += Duration::minutes(30);
        let series = ohlcv(vec![bar(0, 100.0), off, bar(2, 102.0)]);
        let filled =
            fill_gaps(&series, Period::OneHour, at(0), at(2), FillPolicy::ForwardFillZeroVolume).unwrap();
        assert_eq!(filled.len(), 3);
        assert_eq!(filled.get(at(1)).unwrap().close(), Some(100.0));
    }

    #[test]
    fn test_empty_series_stays_empty() {
        let series = ohlcv(vec![]);
        let (filled, stats) =
            fill_gaps_with_stats(&series, Period::OneHour, at(0), at(3), FillPolicy::ForwardFillZeroVolume)
                .unwrap();
        assert!(filled.is_empty());
        assert_eq!(stats.omitted_leading, 4);
    }

    // ============================================
    // ForwardFill Tests
    // ============================================

    #[test]
    fn test_forward_fill_carries_price_and_zeroes_volume() {
        let meta = SeriesMeta::new("coingecko", "ethereum", "usd", SeriesKind::Price);
        let series = Series::from_points(
            meta,
            vec![
                TimePoint::new(at(0)).with("price", 2000.0).with("volume", 10.0),
                TimePoint::new(at(2)).with("price", 2100.0).with("volume", 12.0),
            ],
        );
        let filled = fill_gaps(&series, Period::OneHour, at(0), at(2), FillPolicy::ForwardFill).unwrap();
        let synthetic = filled.get(at(1)).unwrap();
        assert_eq!(synthetic.get("price"), Some(2000.0));
        assert_eq!(synthetic.get("volume"), Some(0.0));
    }

    // ============================================
    // Reject Tests
    // ============================================

    #[test]
    fn test_reject_reports_first_missing_run() {
        let meta = SeriesMeta::new("bybit", "BTCUSDT", "ratio", SeriesKind::Rate);
        let series = Series::from_points(
            meta,
            vec![
                TimePoint::new(at(0)).with("rate", 0.1),
                TimePoint::new(at(3)).with("rate", 0.1),
                TimePoint::new(at(5)).with("rate", 0.1),
            ],
        );
        let err = fill_gaps(&series, Period::OneHour, at(0), at(5), FillPolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            ErrorKind::CoverageGap {
                from: at(1),
                to: at(2)
            }
        );
    }

    #[test]
    fn test_reject_trailing_gap() {
        let meta = SeriesMeta::new("bybit", "BTCUSDT", "ratio", SeriesKind::Rate);
        let series = Series::from_points(meta, vec![TimePoint::new(at(0)).with("rate", 0.1)]);
        let err = fill_gaps(&series, Period::OneHour, at(0), at(2), FillPolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            ErrorKind::CoverageGap {
                from: at(1),
                to: at(2)
            }
        );
    }

    #[test]
    fn test_reject_complete_series_passes() {
        let meta = SeriesMeta::new("bybit", "BTCUSDT", "ratio", SeriesKind::Rate);
        let points = (0..3).map(|h| TimePoint::new(at(h)).with("rate", 0.1)).collect();
        let series = Series::from_points(meta, points);
        let filled = fill_gaps(&series, Period::OneHour, at(0), at(2), FillPolicy::Reject).unwrap();
        assert_eq!(filled.len(), 3);
    }

    #[test]
    fn test_policy_for_kind() {
        assert_eq!(FillPolicy::for_kind(SeriesKind::Gas), FillPolicy::ForwardFillZeroVolume);
        assert_eq!(FillPolicy::for_kind(SeriesKind::Price), FillPolicy::ForwardFill);
        assert_eq!(FillPolicy::for_kind(SeriesKind::Rate), FillPolicy::Reject);
    }
}

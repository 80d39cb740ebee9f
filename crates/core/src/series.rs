//! Canonical time-series model.
//!
//! A [`Series`] is an ascending, timestamp-deduplicated sequence of
//! [`TimePoint`]s tagged with provenance ([`SeriesMeta`]). Every adapter
//! normalizes into this shape and every transform consumes it.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorKind;
use crate::period::Period;

/// Canonical OHLCV column order.
pub const OHLCV_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// What a series measures. Drives column order and reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Exchange candles.
    Ohlcv,
    /// On-chain gas price, stored as OHLCV bars in gwei.
    Gas,
    /// Spot/pool price samples.
    Price,
    /// Point-in-time rates (funding, borrow APY).
    Rate,
    /// Cumulative compounding indices.
    Index,
}

impl SeriesKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Ohlcv => "ohlcv",
            SeriesKind::Gas => "gas",
            SeriesKind::Price => "price",
            SeriesKind::Rate => "rate",
            SeriesKind::Index => "index",
        }
    }

    /// Columns that lead the CSV header for this kind, if any.
    #[must_use]
    pub fn leading_columns(&self) -> &'static [&'static str] {
        match self {
            SeriesKind::Ohlcv | SeriesKind::Gas => &OHLCV_COLUMNS,
            SeriesKind::Price => &["price", "volume"],
            SeriesKind::Rate | SeriesKind::Index => &[],
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ohlcv" => Ok(SeriesKind::Ohlcv),
            "gas" => Ok(SeriesKind::Gas),
            "price" => Ok(SeriesKind::Price),
            "rate" => Ok(SeriesKind::Rate),
            "index" => Ok(SeriesKind::Index),
            other => Err(ErrorKind::config(format!("unknown series kind: {other}"))),
        }
    }
}

/// Provenance carried by every series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMeta {
    /// Source identifier (e.g. "binance_klines")
    pub source_id: String,
    /// Instrument identifier (e.g. "BTCUSDT", "USDC")
    pub instrument_id: String,
    /// Unit of the value fields (e.g. "usdt", "gwei", "ratio")
    pub unit: String,
    /// Series kind
    pub kind: SeriesKind,
}

impl SeriesMeta {
    /// Creates new series metadata.
    pub fn new(
        source_id: impl Into<String>,
        instrument_id: impl Into<String>,
        unit: impl Into<String>,
        kind: SeriesKind,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            unit: unit.into(),
            kind,
        }
    }

    /// Returns a copy with a different kind and unit.
    #[must_use]
    pub fn derive(&self, kind: SeriesKind, unit: impl Into<String>) -> Self {
        Self {
            source_id: self.source_id.clone(),
            instrument_id: self.instrument_id.clone(),
            unit: unit.into(),
            kind,
        }
    }
}

/// One observation: a UTC instant and its named values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// Observation time, second precision
    pub timestamp: DateTime<Utc>,
    /// Named values
    pub fields: BTreeMap<String, f64>,
}

impl TimePoint {
    /// Creates an empty point. Sub-second precision is truncated.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Creates an OHLCV point.
    pub fn ohlcv(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self::new(timestamp)
            .with("open", open)
            .with("high", high)
            .with("low", low)
            .with("close", close)
            .with("volume", volume)
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    /// Sets a field value.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the `close` field.
    #[must_use]
    pub fn close(&self) -> Option<f64> {
        self.get("close")
    }
}

/// Ascending, deduplicated sequence of points with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    meta: SeriesMeta,
    points: Vec<TimePoint>,
}

impl Series {
    /// Creates an empty series.
    pub fn new(meta: SeriesMeta) -> Self {
        Self {
            meta,
            points: Vec::new(),
        }
    }

    /// Builds a series from points in arbitrary order.
    ///
    /// Points are stably sorted by timestamp; when several share a timestamp
    /// the one that came last in the input wins.
    pub fn from_points(meta: SeriesMeta, mut points: Vec<TimePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);

        let mut deduped: Vec<TimePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        Self {
            meta,
            points: deduped,
        }
    }

    /// Builds a series from points already known to be sorted and unique.
    ///
    /// # Errors
    /// Returns `Internal` if the points are not strictly ascending.
    pub fn from_sorted(meta: SeriesMeta, points: Vec<TimePoint>) -> Result<Self, ErrorKind> {
        if points.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(ErrorKind::Internal(
                "points are not strictly ascending".to_string(),
            ));
        }
        Ok(Self { meta, points })
    }

    /// Merges `other` into this series. Points from `other` win on conflict.
    pub fn merge(&mut self, other: Series) {
        let mut all = std::mem::take(&mut self.points);
        all.extend(other.points);
        *self = Series::from_points(self.meta.clone(), all);
    }

    #[must_use]
    pub fn meta(&self) -> &SeriesMeta {
        &self.meta
    }

    #[must_use]
    pub fn kind(&self) -> SeriesKind {
        self.meta.kind
    }

    #[must_use]
    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&TimePoint> {
        self.points.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&TimePoint> {
        self.points.last()
    }

    /// Timestamps in ascending order.
    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.points.iter().map(|p| p.timestamp)
    }

    /// Exact-timestamp lookup (binary search).
    #[must_use]
    pub fn get(&self, ts: DateTime<Utc>) -> Option<&TimePoint> {
        self.points
            .binary_search_by_key(&ts, |p| p.timestamp)
            .ok()
            .map(|i| &self.points[i])
    }

    /// Points with `start <= timestamp <= end`.
    #[must_use]
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[TimePoint] {
        let lo = self.points.partition_point(|p| p.timestamp < start);
        let hi = self.points.partition_point(|p| p.timestamp <= end);
        if lo >= hi {
            &[]
        } else {
            &self.points[lo..hi]
        }
    }

    /// Column names: the kind's leading columns first, then any other field
    /// names in lexical order.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let leading = self.meta.kind.leading_columns();
        let mut columns: Vec<String> = leading.iter().map(|c| (*c).to_string()).collect();

        let mut extra: Vec<&String> = self
            .points
            .iter()
            .flat_map(|p| p.fields.keys())
            .filter(|k| !leading.contains(&k.as_str()))
            .collect();
        extra.sort();
        extra.dedup();

        columns.extend(extra.into_iter().cloned());
        columns
    }

    /// Returns true if consecutive timestamps are exactly one period apart.
    #[must_use]
    pub fn is_regular(&self, period: Period) -> bool {
        let step = period.duration();
        self.points
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == step)
    }

    /// Largest spacing between consecutive points, if there are at least two.
    #[must_use]
    pub fn max_spacing(&self) -> Option<Duration> {
        self.points
            .windows(2)
            .map(|w| w[1].timestamp - w[0].timestamp)
            .max()
    }
}

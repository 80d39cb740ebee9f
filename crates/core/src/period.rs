//! Sampling periods for canonical series.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ErrorKind;

/// Seconds in a 365-day year.
const SECONDS_PER_YEAR: i64 = 365 * 86_400;

/// Spacing between consecutive points of a regular series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Period {
    /// Returns the API string representation (Binance-style).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMinute => "1m",
            Period::FiveMinutes => "5m",
            Period::FifteenMinutes => "15m",
            Period::ThirtyMinutes => "30m",
            Period::OneHour => "1h",
            Period::FourHours => "4h",
            Period::EightHours => "8h",
            Period::OneDay => "1d",
        }
    }

    /// Returns the period length in seconds.
    #[must_use]
    pub fn seconds(&self) -> i64 {
        match self {
            Period::OneMinute => 60,
            Period::FiveMinutes => 300,
            Period::FifteenMinutes => 900,
            Period::ThirtyMinutes => 1_800,
            Period::OneHour => 3_600,
            Period::FourHours => 14_400,
            Period::EightHours => 28_800,
            Period::OneDay => 86_400,
        }
    }

    /// Returns the period as a chrono duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Number of periods in a 365-day year.
    #[must_use]
    pub fn periods_per_year(&self) -> f64 {
        SECONDS_PER_YEAR as f64 / self.seconds() as f64
    }

    /// Number of records a source sampling at this period emits per day.
    #[must_use]
    pub fn records_per_day(&self) -> u64 {
        (86_400 / self.seconds()) as u64
    }

    /// Rounds `ts` down to a period boundary (epoch-aligned).
    #[must_use]
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let aligned = secs - secs.rem_euclid(self.seconds());
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(ts)
    }

    /// Rounds `ts` up to a period boundary (epoch-aligned).
    #[must_use]
    pub fn ceil(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floored = self.floor(ts);
        if floored == ts && ts.timestamp_subsec_nanos() == 0 {
            ts
        } else {
            floored + self.duration()
        }
    }

    /// Returns true if `ts` sits exactly on a period boundary.
    #[must_use]
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.seconds()) == 0
    }
}

impl Default for Period {
    fn default() -> Self {
        Period::OneHour
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(Period::OneMinute),
            "5m" => Ok(Period::FiveMinutes),
            "15m" => Ok(Period::FifteenMinutes),
            "30m" => Ok(Period::ThirtyMinutes),
            "1h" => Ok(Period::OneHour),
            "4h" => Ok(Period::FourHours),
            "8h" => Ok(Period::EightHours),
            "1d" => Ok(Period::OneDay),
            _ => Err(ErrorKind::config(format!(
                "invalid period: '{s}'. Valid values: 1m, 5m, 15m, 30m, 1h, 4h, 8h, 1d"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_period_as_str_roundtrip() {
        for period in [
            Period::OneMinute,
            Period::FiveMinutes,
            Period::FifteenMinutes,
            Period::ThirtyMinutes,
            Period::OneHour,
            Period::FourHours,
            Period::EightHours,
            Period::OneDay,
        ] {
            assert_eq!(Period::from_str(period.as_str()).unwrap(), period);
        }
    }

    #[test]
    fn test_period_from_str_case_insensitive() {
        assert_eq!(Period::from_str("1H").unwrap(), Period::OneHour);
        assert_eq!(Period::from_str("1D").unwrap(), Period::OneDay);
    }

    #[test]
    fn test_period_from_str_invalid() {
        let err = Period::from_str("2w").unwrap_err();
        assert!(err.to_string().contains("invalid period"));
    }

    #[test]
    fn test_periods_per_year() {
        assert!((Period::OneHour.periods_per_year() - 8760.0).abs() < 1e-9);
        assert!((Period::OneDay.periods_per_year() - 365.0).abs() < 1e-9);
    }

    #[test]
    fn test_records_per_day() {
        assert_eq!(Period::OneHour.records_per_day(), 24);
        assert_eq!(Period::OneMinute.records_per_day(), 1440);
        assert_eq!(Period::EightHours.records_per_day(), 3);
    }

    #[test]
    fn test_floor_and_ceil() {
        let p = Period::OneHour;
        assert_eq!(p.floor(ts(5, 30, 0)), ts(5, 0, 0));
        assert_eq!(p.ceil(ts(5, 30, 0)), ts(6, 0, 0));
        assert_eq!(p.floor(ts(5, 0, 0)), ts(5, 0, 0));
        assert_eq!(p.ceil(ts(5, 0, 0)), ts(5, 0, 0));
    }

    #[test]
    fn test_is_aligned() {
        assert!(Period::OneHour.is_aligned(ts(3, 0, 0)));
        assert!(!Period::OneHour.is_aligned(ts(3, 45, 0)));
        assert!(Period::FifteenMinutes.is_aligned(ts(3, 45, 0)));
    }
}

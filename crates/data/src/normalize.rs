//! Helpers that turn heterogeneous API payloads into [`TimePoint`]s.
//!
//! Adapters share these in their `parse_page` implementations: unit
//! conversion (Wei, ray, hex quantities), epoch decoding with unit
//! detection, string-or-number decimals, and a [`RecordBuilder`] that maps
//! payload keys onto canonical field names.

use backfill_core::{ErrorKind, Result, TimePoint};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// Scale of a ray fixed-point quantity (1e27).
pub const RAY_DECIMALS: u32 = 27;

/// Wei per Gwei, as a decimal scale.
const GWEI_DECIMALS: u32 = 9;

const MICROS_THRESHOLD: i64 = 100_000_000_000_000;
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parses a JSON-RPC hex quantity such as `"0x3b9aca00"`.
///
/// # Errors
/// Returns `MalformedRecord` if the string is not a `0x`-prefixed hex number.
pub fn parse_hex_quantity(raw: &str) -> Result<u128> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ErrorKind::malformed(format!("hex quantity without 0x prefix: {raw}")))?;

    if digits.is_empty() {
        return Err(ErrorKind::malformed("empty hex quantity"));
    }

    u128::from_str_radix(digits, 16)
        .map_err(|e| ErrorKind::malformed(format!("invalid hex quantity {raw}: {e}")))
}

/// Converts Wei to Gwei.
///
/// Exact through `Decimal` for every value that fits its 96-bit mantissa;
/// larger values fall back to float division.
#[must_use]
pub fn wei_to_gwei(wei: u128) -> f64 {
    i128::try_from(wei)
        .ok()
        .and_then(|w| Decimal::try_from_i128_with_scale(w, GWEI_DECIMALS).ok())
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| wei as f64 / 1e9)
}

/// Converts a ray-scaled integer string (e.g. Aave indices) to a float.
///
/// # Errors
/// Returns `MalformedRecord` if the value is not a non-negative integer.
pub fn ray_to_f64(raw: &str) -> Result<f64> {
    let value = u128::from_str(raw.trim())
        .map_err(|e| ErrorKind::malformed(format!("invalid ray value {raw}: {e}")))?;

    let exact = i128::try_from(value)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, RAY_DECIMALS).ok())
        .and_then(|d| d.to_f64());

    Ok(exact.unwrap_or_else(|| value as f64 / 1e27))
}

/// Decodes a decimal given either as a JSON string or a JSON number.
#[must_use]
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok(),
        // Go through the string form to keep the literal's precision.
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        _ => None,
    }
}

/// Decodes a float given either as a JSON string or a JSON number.
#[must_use]
pub fn f64_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Decodes an integer epoch value given as a string or a number.
#[must_use]
pub fn i64_from_json(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[must_use]
pub fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[must_use]
pub fn from_epoch_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Decodes an epoch value whose unit (s, ms or µs) is inferred from its
/// magnitude. Valid for instants between 1973 and 5138.
#[must_use]
pub fn from_epoch_auto(value: i64) -> Option<DateTime<Utc>> {
    if value >= MICROS_THRESHOLD {
        from_epoch_micros(value)
    } else if value >= MILLIS_THRESHOLD {
        from_epoch_millis(value)
    } else {
        from_epoch_secs(value)
    }
}

/// Builds one [`TimePoint`] from a JSON record (object or positional array).
///
/// Missing or undecodable required fields are collected and reported
/// together by [`RecordBuilder::build`].
pub struct RecordBuilder<'a> {
    record: &'a Value,
    point: TimePoint,
    missing: Vec<String>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(record: &'a Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            record,
            point: TimePoint::new(timestamp),
            missing: Vec::new(),
        }
    }

    /// Maps `key` (an object key or array index) to the canonical `name`.
    #[must_use]
    pub fn require<I>(mut self, key: I, name: &str) -> Self
    where
        I: serde_json::value::Index + Display,
    {
        match self.record.get(&key).and_then(f64_from_json) {
            Some(v) => self.point.set(name, v),
            None => self.missing.push(format!("{name} ({key})")),
        }
        self
    }

    /// Like [`require`](Self::require) but an absent value is not an error.
    #[must_use]
    pub fn optional<I>(mut self, key: I, name: &str) -> Self
    where
        I: serde_json::value::Index,
    {
        if let Some(v) = self.record.get(&key).and_then(f64_from_json) {
            self.point.set(name, v);
        }
        self
    }

    /// Sets a field to an already-decoded value.
    #[must_use]
    pub fn value(mut self, name: &str, value: f64) -> Self {
        self.point.set(name, value);
        self
    }

    /// # Errors
    /// Returns `MalformedRecord` naming every missing required field.
    pub fn build(self) -> Result<TimePoint> {
        if self.missing.is_empty() {
            Ok(self.point)
        } else {
            Err(ErrorKind::malformed(format!(
                "record at {} missing {}",
                self.point.timestamp.to_rfc3339(),
                self.missing.join(", ")
            )))
        }
    }
}

/// Records of one page after malformed entries were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedRecords {
    pub points: Vec<TimePoint>,
    pub malformed: usize,
}

/// Keeps the well-formed records of a page in order, logging and counting
/// the rest.
pub fn collect_records(records: Vec<Result<TimePoint>>, context: &str) -> CollectedRecords {
    let mut collected = CollectedRecords {
        points: Vec::with_capacity(records.len()),
        malformed: 0,
    };

    for record in records {
        match record {
            Ok(point) => collected.points.push(point),
            Err(e) => {
                warn!(context = %context, error = %e, "Skipping malformed record");
                collected.malformed += 1;
            }
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    // ============================================
    // Unit Conversion Tests
    // ============================================

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0x3b9aca00").unwrap(), 1_000_000_000);
        assert!(parse_hex_quantity("3b9aca00").is_err());
        assert!(parse_hex_quantity("0x").is_err());
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_wei_to_gwei() {
        assert_eq!(wei_to_gwei(1_000_000_000), 1.0);
        assert!((wei_to_gwei(12_345_678_901) - 12.345678901).abs() < 1e-12);
        assert_eq!(wei_to_gwei(0), 0.0);
    }

    #[test]
    fn test_ray_to_f64() {
        let one = ray_to_f64("1000000000000000000000000000").unwrap();
        assert!((one - 1.0).abs() < 1e-15);

        let rate = ray_to_f64("35000000000000000000000000").unwrap();
        assert!((rate - 0.035).abs() < 1e-15);

        assert!(ray_to_f64("-1").is_err());
        assert!(ray_to_f64("1.5").is_err());
    }

    #[test]
    fn test_decimal_from_json_string_and_number() {
        assert_eq!(decimal_from_json(&json!("50000.12")), Some(dec!(50000.12)));
        assert_eq!(decimal_from_json(&json!(0.0001)), Some(dec!(0.0001)));
        assert_eq!(decimal_from_json(&json!(null)), None);
    }

    #[test]
    fn test_f64_from_json_rejects_non_numeric() {
        assert_eq!(f64_from_json(&json!("1.5")), Some(1.5));
        assert_eq!(f64_from_json(&json!(2)), Some(2.0));
        assert_eq!(f64_from_json(&json!("abc")), None);
        assert_eq!(f64_from_json(&json!("NaN")), None);
        assert_eq!(f64_from_json(&json!([1])), None);
    }

    // ============================================
    // Timestamp Tests
    // ============================================

    #[test]
    fn test_from_epoch_auto_detects_unit() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(from_epoch_auto(1_704_067_200), Some(expected));
        assert_eq!(from_epoch_auto(1_704_067_200_000), Some(expected));
        assert_eq!(from_epoch_auto(1_704_067_200_000_000), Some(expected));
    }

    // ============================================
    // RecordBuilder Tests
    // ============================================

    #[test]
    fn test_record_builder_object() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = json!({"fundingRate": "0.0001", "markPrice": 42000.5});
        let point = RecordBuilder::new(&record, ts)
            .require("fundingRate", "rate")
            .optional("markPrice", "mark_price")
            .optional("missing", "ignored")
            .build()
            .unwrap();

        assert_eq!(point.get("rate"), Some(0.0001));
        assert_eq!(point.get("mark_price"), Some(42000.5));
        assert_eq!(point.get("ignored"), None);
    }

    #[test]
    fn test_record_builder_array() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = json!([1704067200000_i64, "1.0", "2.0", "0.5", "1.5", "10"]);
        let point = RecordBuilder::new(&record, ts)
            .require(1, "open")
            .require(4, "close")
            .require(5, "volume")
            .build()
            .unwrap();
        assert_eq!(point.close(), Some(1.5));
        assert_eq!(point.get("volume"), Some(10.0));
    }

    #[test]
    fn test_record_builder_reports_missing() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = json!({"open": "1"});
        let err = RecordBuilder::new(&record, ts)
            .require("open", "open")
            .require("close", "close")
            .build()
            .unwrap_err();
        assert!(matches!(err, ErrorKind::MalformedRecord(ref m) if m.contains("close")));
    }

    #[test]
    fn test_collect_records_skips_and_counts() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            Ok(TimePoint::new(ts).with("close", 1.0)),
            Err(ErrorKind::malformed("bad")),
            Ok(TimePoint::new(ts + chrono::Duration::hours(1)).with("close", 2.0)),
        ];
        let collected = collect_records(records, "test");
        assert_eq!(collected.malformed, 1);
        assert_eq!(collected.points.len(), 2);
        assert_eq!(collected.points[1].close(), Some(2.0));
    }
}

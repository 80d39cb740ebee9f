//! Aave reserve history: daily snapshots of the liquidity and variable
//! borrow indices together with the instantaneous rates.
//!
//! Indices and rates are ray-scaled (1e27) integer strings. The instrument
//! id is the reserve id (underlying asset address concatenated with the
//! pool addresses provider).

use async_trait::async_trait;
use backfill_core::{ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{f64_from_json, from_epoch_secs, i64_from_json, ray_to_f64};
use chrono::{Duration, NaiveDate};
use serde_json::Value;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::ForwardChunks;

pub const SOURCE_ID: &str = "aave_rates";

const AAVE_API: &str = "https://aave-api-v2.aave.com";

const MAX_SNAPSHOTS_PER_REQUEST: usize = 365;

/// Ray-scaled fields: (response key, output field)
const RAY_FIELDS: &[(&str, &str)] = &[
    ("liquidityIndex", "liquidity_index"),
    ("variableBorrowIndex", "borrow_index"),
    ("liquidityRate", "liquidity_rate"),
    ("variableBorrowRate", "borrow_rate"),
];

/// Plain decimal fields
const PLAIN_FIELDS: &[(&str, &str)] = &[
    ("utilizationRate", "utilization"),
    ("totalLiquidity", "total_supplied"),
    ("totalBorrows", "total_borrowed"),
];

#[derive(Debug, Clone)]
pub struct AaveRates {
    base_url: String,
    planner: ForwardChunks,
}

impl AaveRates {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| AAVE_API.to_string()),
            planner: ForwardChunks::for_period(MAX_SNAPSHOTS_PER_REQUEST, Period::OneDay),
        }
    }

    fn parse_snapshot(snapshot: &Value) -> Result<TimePoint> {
        let timestamp = snapshot
            .get("timestamp")
            .and_then(i64_from_json)
            .and_then(from_epoch_secs)
            .ok_or_else(|| ErrorKind::malformed(format!("snapshot without timestamp: {snapshot}")))?;

        let mut point = TimePoint::new(timestamp);
        for (key, name) in RAY_FIELDS {
            let Some(raw) = snapshot.get(*key) else {
                continue;
            };
            let value = match raw {
                Value::String(s) => ray_to_f64(s)?,
                other => {
                    return Err(ErrorKind::malformed(format!(
                        "{key} at {timestamp} is not a ray string: {other}"
                    )))
                }
            };
            point.set(*name, value);
        }
        for (key, name) in PLAIN_FIELDS {
            if let Some(value) = snapshot.get(*key).and_then(f64_from_json) {
                point.set(*name, value);
            }
        }

        let missing: Vec<&str> = RAY_FIELDS[..2]
            .iter()
            .filter(|(_, name)| point.get(name).is_none())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(ErrorKind::malformed(format!(
                "snapshot at {timestamp} missing {}",
                missing.join(", ")
            )));
        }
        Ok(point)
    }
}

#[async_trait]
impl SourceAdapter for AaveRates {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn kind(&self) -> SeriesKind {
        SeriesKind::Index
    }

    fn unit(&self) -> &str {
        "index"
    }

    fn min_start_date(&self) -> NaiveDate {
        // Aave v2 mainnet market launch
        NaiveDate::from_ymd_opt(2020, 12, 3).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::ForwardChunks
    }

    fn page_size(&self) -> usize {
        MAX_SNAPSHOTS_PER_REQUEST
    }

    fn period(&self) -> Period {
        Period::OneDay
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let (start, end) = self.planner.chunk(window);
        let request = Request::get(format!("{}/data/rates-history", self.base_url))
            .query("reserveId", &window.instrument_id)
            .query("from", start.timestamp())
            .query("to", end.timestamp())
            .query("resolutionInHours", 24);

        fetcher.fetch_json(&request).await.map(Payload::Json)
    }

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Json(value) = payload else {
            return Ok(Page::empty());
        };
        let snapshots = value
            .as_array()
            .ok_or_else(|| ErrorKind::malformed(format!("expected snapshot array, got {value}")))?;

        let records: Vec<Result<TimePoint>> = snapshots.iter().map(Self::parse_snapshot).collect();
        let last = records
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|p| p.timestamp))
            .max();
        let page_full = snapshots.len() >= MAX_SNAPSHOTS_PER_REQUEST;

        let next = self
            .planner
            .next(window, last, page_full, Duration::seconds(1));
        Ok(Page::new(records, next))
    }
}

//! Bybit perpetual funding-rate history (`/v5/market/funding/history`).
//!
//! The endpoint returns at most 200 settlements newest first, so pages walk
//! backward from the window end.

use async_trait::async_trait;
use backfill_core::{ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{from_epoch_millis, i64_from_json};
use backfill_data::RecordBuilder;
use chrono::NaiveDate;
use serde_json::Value;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::BackwardCursor;

pub const SOURCE_ID: &str = "bybit_funding";

const BYBIT_API: &str = "https://api.bybit.com";

const MAX_FUNDING_PER_REQUEST: usize = 200;

#[derive(Debug, Clone)]
pub struct BybitFunding {
    base_url: String,
}

impl BybitFunding {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| BYBIT_API.to_string()),
        }
    }

    fn parse_entry(entry: &Value) -> Result<TimePoint> {
        let timestamp = entry
            .get("fundingRateTimestamp")
            .and_then(i64_from_json)
            .and_then(from_epoch_millis)
            .ok_or_else(|| ErrorKind::malformed(format!("funding entry without timestamp: {entry}")))?;

        RecordBuilder::new(entry, timestamp)
            .require("fundingRate", "rate")
            .build()
    }

    /// Unwraps the v5 response envelope.
    fn entries(value: &Value) -> Result<&[Value]> {
        let code = value.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = value
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ErrorKind::client(400, format!("retCode {code}: {message}")));
        }
        value
            .pointer("/result/list")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| ErrorKind::malformed(format!("funding response without list: {value}")))
    }
}

#[async_trait]
impl SourceAdapter for BybitFunding {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn kind(&self) -> SeriesKind {
        SeriesKind::Rate
    }

    fn unit(&self) -> &str {
        "ratio"
    }

    fn min_start_date(&self) -> NaiveDate {
        // BTCUSDT perpetual launch
        NaiveDate::from_ymd_opt(2020, 3, 26).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::BackwardCursor
    }

    fn page_size(&self) -> usize {
        MAX_FUNDING_PER_REQUEST
    }

    /// Funding settles every 8 hours.
    fn period(&self) -> Period {
        Period::EightHours
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let request = Request::get(format!("{}/v5/market/funding/history", self.base_url))
            .query("category", "linear")
            .query("symbol", &window.instrument_id)
            .query("startTime", window.start.timestamp_millis())
            .query("endTime", BackwardCursor::end_bound(window).timestamp_millis())
            .query("limit", MAX_FUNDING_PER_REQUEST);

        fetcher.fetch_json(&request).await.map(Payload::Json)
    }

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Json(value) = payload else {
            return Ok(Page::empty());
        };

        let entries = Self::entries(&value)?;
        let records: Vec<Result<TimePoint>> = entries.iter().map(Self::parse_entry).collect();
        let oldest = records
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|p| p.timestamp))
            .min();

        Ok(Page::new(records, BackwardCursor::next(window, oldest)))
    }
}

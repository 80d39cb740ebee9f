//! CoinGecko market-chart prices.
//!
//! `market_chart/range` picks its own granularity from the span: 5 minute
//! points under a day, hourly up to 90 days, daily beyond. Requests are
//! kept to 90-day chunks and timestamps floored onto the period grid, with
//! the last point in each bucket winning.

use async_trait::async_trait;
use backfill_core::{ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{f64_from_json, from_epoch_millis, i64_from_json};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::ForwardChunks;

pub const SOURCE_ID: &str = "coingecko_prices";

const COINGECKO_API: &str = "https://api.coingecko.com";

/// Longest span CoinGecko still serves hourly
const CHUNK_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct CoinGeckoPrices {
    base_url: String,
    api_key: Option<String>,
    period: Period,
    planner: ForwardChunks,
}

impl CoinGeckoPrices {
    pub fn new(base_url: Option<String>, api_key: Option<String>, period: Period) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| COINGECKO_API.to_string()),
            api_key,
            period,
            planner: ForwardChunks::days(CHUNK_DAYS),
        }
    }

    /// `[[ms, value], ...]` pairs keyed by floored timestamp, together with
    /// the entries whose timestamp could not be decoded.
    fn pairs(
        &self,
        value: &Value,
        key: &str,
    ) -> (BTreeMap<DateTime<Utc>, Option<f64>>, Vec<ErrorKind>) {
        let mut out = BTreeMap::new();
        let mut undecodable = Vec::new();
        let Some(items) = value.get(key).and_then(Value::as_array) else {
            return (out, undecodable);
        };
        for item in items {
            match item.get(0).and_then(i64_from_json).and_then(from_epoch_millis) {
                Some(ts) => {
                    out.insert(self.period.floor(ts), item.get(1).and_then(f64_from_json));
                }
                None => undecodable.push(ErrorKind::malformed(format!(
                    "{key} entry without a timestamp: {item}"
                ))),
            }
        }
        (out, undecodable)
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoPrices {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn kind(&self) -> SeriesKind {
        SeriesKind::Price
    }

    fn unit(&self) -> &str {
        "usd"
    }

    fn min_start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 4, 28).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::ForwardChunks
    }

    fn page_size(&self) -> usize {
        (CHUNK_DAYS as u64 * self.period.records_per_day()) as usize
    }

    fn period(&self) -> Period {
        self.period
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let (start, end) = self.planner.chunk(window);
        let mut request = Request::get(format!(
            "{}/api/v3/coins/{}/market_chart/range",
            self.base_url, window.instrument_id
        ))
        .query("vs_currency", "usd")
        .query("from", start.timestamp())
        .query("to", end.timestamp());
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key.clone());
        }

        fetcher.fetch_json(&request).await.map(Payload::Json)
    }

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Json(value) = payload else {
            return Ok(Page::empty());
        };
        if value.get("prices").and_then(Value::as_array).is_none() {
            return Err(ErrorKind::malformed(format!(
                "market chart without prices: {value}"
            )));
        }

        let (prices, undecodable) = self.pairs(&value, "prices");
        let (volumes, bad_volumes) = self.pairs(&value, "total_volumes");
        if !bad_volumes.is_empty() {
            debug!(
                source = SOURCE_ID,
                instrument = %window.instrument_id,
                dropped = bad_volumes.len(),
                "Volume entries without timestamps"
            );
        }

        let mut records: Vec<Result<TimePoint>> = undecodable.into_iter().map(Err).collect();
        records.extend(prices.iter().map(|(ts, price)| {
            let price =
                price.ok_or_else(|| ErrorKind::malformed(format!("price at {ts} is not a number")))?;
            let mut point = TimePoint::new(*ts).with("price", price);
            if let Some(Some(volume)) = volumes.get(ts) {
                point.set("volume", *volume);
            }
            Ok(point)
        }));

        let next = self
            .planner
            .next(window, None, false, self.period.duration());
        Ok(Page::new(records, next))
    }
}

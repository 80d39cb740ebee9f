//! Binance spot klines over the REST API.
//!
//! Requests `/api/v3/klines` in day chunks sized so each chunk fits one
//! page of `MAX_KLINES_PER_REQUEST` candles.

use async_trait::async_trait;
use backfill_core::{ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{from_epoch_millis, i64_from_json};
use backfill_data::RecordBuilder;
use chrono::NaiveDate;
use serde_json::Value;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::ForwardChunks;

pub const SOURCE_ID: &str = "binance_klines";

/// Binance spot REST base URL
const BINANCE_API: &str = "https://api.binance.com";

/// Maximum candles per request
const MAX_KLINES_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone)]
pub struct BinanceKlines {
    base_url: String,
    period: Period,
    planner: ForwardChunks,
}

impl BinanceKlines {
    pub fn new(base_url: Option<String>, period: Period) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| BINANCE_API.to_string()),
            period,
            planner: ForwardChunks::for_period(MAX_KLINES_PER_REQUEST, period),
        }
    }

    fn parse_kline(&self, kline: &Value) -> Result<TimePoint> {
        let timestamp = kline
            .get(0)
            .and_then(i64_from_json)
            .and_then(from_epoch_millis)
            .ok_or_else(|| ErrorKind::malformed(format!("kline without open time: {kline}")))?;

        RecordBuilder::new(kline, timestamp)
            .require(1, "open")
            .require(2, "high")
            .require(3, "low")
            .require(4, "close")
            .require(5, "volume")
            .optional(7, "quote_volume")
            .optional(8, "trades")
            .build()
    }
}

#[async_trait]
impl SourceAdapter for BinanceKlines {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn kind(&self) -> SeriesKind {
        SeriesKind::Ohlcv
    }

    fn unit(&self) -> &str {
        "quote"
    }

    fn min_start_date(&self) -> NaiveDate {
        // BTCUSDT listing
        NaiveDate::from_ymd_opt(2017, 8, 17).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::ForwardChunks
    }

    fn page_size(&self) -> usize {
        MAX_KLINES_PER_REQUEST
    }

    fn period(&self) -> Period {
        self.period
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let (start, end) = self.planner.chunk(window);
        let request = Request::get(format!("{}/api/v3/klines", self.base_url))
            .query("symbol", &window.instrument_id)
            .query("interval", self.period.as_str())
            .query("startTime", start.timestamp_millis())
            .query("endTime", end.timestamp_millis())
            .query("limit", MAX_KLINES_PER_REQUEST);

        fetcher.fetch_json(&request).await.map(Payload::Json)
    }

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Json(value) = payload else {
            return Ok(Page::empty());
        };
        let klines = value
            .as_array()
            .ok_or_else(|| ErrorKind::malformed(format!("expected kline array, got {value}")))?;

        let records: Vec<Result<TimePoint>> = klines.iter().map(|k| self.parse_kline(k)).collect();
        let last = records
            .iter()
            .rev()
            .find_map(|r| r.as_ref().ok().map(|p| p.timestamp));
        let page_full = klines.len() >= MAX_KLINES_PER_REQUEST;

        let next = self
            .planner
            .next(window, last, page_full, self.period.duration());

        Ok(Page::new(records, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{drain, DrainConfig};
    use crate::rate_limiter::RateLimiter;
    use backfill_core::{Cursor, FetcherConfig, Shutdown};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn kline(h: i64, close: f64) -> Value {
        json!([
            at(h).timestamp_millis(),
            "1.0",
            "2.0",
            "0.5",
            close.to_string(),
            "10.0",
            at(h).timestamp_millis() + 3_599_999,
            "100.0",
            42,
            "5.0",
            "50.0",
            "0"
        ])
    }

    fn fetcher() -> ResilientFetcher {
        let limiter = Arc::new(RateLimiter::new(SOURCE_ID, 100, 1_000).unwrap());
        ResilientFetcher::new(
            FetcherConfig {
                base_delay_ms: 1,
                max_delay_ms: 2,
                ..FetcherConfig::default()
            },
            limiter,
            Shutdown::never(),
        )
        .unwrap()
    }

    // ============================================
    // Parsing Tests
    // ============================================

    #[test]
    fn test_parse_kline_fields() {
        let adapter = BinanceKlines::new(None, Period::OneHour);
        let point = adapter.parse_kline(&kline(3, 1.5)).unwrap();
        assert_eq!(point.timestamp, at(3));
        assert_eq!(point.get("open"), Some(1.0));
        assert_eq!(point.close(), Some(1.5));
        assert_eq!(point.get("volume"), Some(10.0));
        assert_eq!(point.get("quote_volume"), Some(100.0));
        assert_eq!(point.get("trades"), Some(42.0));
    }

    #[test]
    fn test_parse_kline_missing_fields_is_malformed() {
        let adapter = BinanceKlines::new(None, Period::OneHour);
        let short = json!([at(0).timestamp_millis(), "1.0", "2.0"]);
        assert!(matches!(
            adapter.parse_kline(&short),
            Err(ErrorKind::MalformedRecord(_))
        ));
        assert!(adapter.parse_kline(&json!(["x"])).is_err());
    }

    #[test]
    fn test_parse_page_non_array_is_malformed() {
        let adapter = BinanceKlines::new(None, Period::OneHour);
        let window = FetchWindow::new(SOURCE_ID, "BTCUSDT", at(0), at(23), 1000);
        let err = adapter
            .parse_page(&window, Payload::Json(json!({"code": -1121})))
            .unwrap_err();
        assert!(matches!(err, ErrorKind::MalformedRecord(_)));
    }

    #[test]
    fn test_single_day_page_finishes_window() {
        let adapter = BinanceKlines::new(None, Period::OneHour);
        let window = FetchWindow::new(SOURCE_ID, "BTCUSDT", at(0), at(23), 1000);
        let payload = Payload::Json(Value::Array((0..24).map(|h| kline(h, 1.0)).collect()));
        let page = adapter.parse_page(&window, payload).unwrap();
        assert_eq!(page.records.len(), 24);
        assert_eq!(page.next, Cursor::Done);
    }

    // ============================================
    // Mock Server Tests
    // ============================================

    #[tokio::test]
    async fn test_drain_single_day() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("interval", "1h"))
            .and(query_param("startTime", at(0).timestamp_millis().to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(Value::Array((0..24).map(|h| kline(h, h as f64)).collect())),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BinanceKlines::new(Some(server.uri()), Period::OneHour);
        let mut window = FetchWindow::new(SOURCE_ID, "BTCUSDT", at(0), at(23), 1000);
        let outcome = drain(&adapter, &fetcher(), &mut window, &DrainConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.series.len(), 24);
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.series.last().unwrap().close(), Some(23.0));
    }

    #[tokio::test]
    async fn test_multi_year_range_terminates_within_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let adapter = BinanceKlines::new(Some(server.uri()), Period::OneHour);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let mut window = FetchWindow::new(SOURCE_ID, "BTCUSDT", start, end, 1000);

        // 1461 days in 41-day chunks
        let outcome = drain(&adapter, &fetcher(), &mut window, &DrainConfig::default())
            .await
            .unwrap();
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.pages, 36);
        assert!(window.cursor.is_done());
    }

    #[tokio::test]
    async fn test_empty_chunk_does_not_end_window() {
        let server = MockServer::start().await;
        let chunk = |n: i64| at(n * 41 * 24).timestamp_millis().to_string();
        Mock::given(method("GET"))
            .and(query_param("startTime", chunk(0)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([kline(5, 1.0)])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startTime", chunk(1)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startTime", chunk(2)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([kline(82 * 24 + 3, 999.0)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BinanceKlines::new(Some(server.uri()), Period::OneHour);
        let mut window = FetchWindow::new(SOURCE_ID, "BTCUSDT", at(0), at(100 * 24 - 1), 1000);
        let outcome = drain(&adapter, &fetcher(), &mut window, &DrainConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.series.len(), 2);
        assert_eq!(
            outcome.series.get(at(82 * 24 + 3)).and_then(|p| p.close()),
            Some(999.0)
        );
    }

    #[tokio::test]
    async fn test_multi_year_range_hits_page_cap() {
        let server = MockServer::start().await;
        // Always return one fresh candle at the requested start.
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(move |req: &wiremock::Request| {
                let start: i64 = req
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "startTime")
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(0);
                let body = json!([[start, "1", "1", "1", "1", "1"]]);
                ResponseTemplate::new(200).set_body_json(body)
            })
            .mount(&server)
            .await;

        let adapter = BinanceKlines::new(Some(server.uri()), Period::OneHour);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        let mut window = FetchWindow::new(SOURCE_ID, "BTCUSDT", start, end, 1000);
        let config = DrainConfig {
            max_pages: 10,
            ..DrainConfig::default()
        };

        let err = drain(&adapter, &fetcher(), &mut window, &config)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::TooManyPages { cap: 10 });
    }
}

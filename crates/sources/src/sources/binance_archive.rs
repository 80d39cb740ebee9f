//! Binance Vision daily kline archives (`data.binance.vision`).
//!
//! One zipped CSV per symbol, interval and day. Spot archives switched from
//! millisecond to microsecond open times in 2025, so both are accepted.

use async_trait::async_trait;
use backfill_core::{ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{from_epoch_auto, i64_from_json};
use backfill_data::RecordBuilder;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::{extract_csv_rows, ArchivePlan};

pub const SOURCE_ID: &str = "binance_archive";

const BINANCE_VISION: &str = "https://data.binance.vision";

const MIN_FILES_PER_PAGE: usize = 1;

#[derive(Debug, Clone)]
pub struct BinanceArchive {
    base_url: String,
    period: Period,
}

impl BinanceArchive {
    pub fn new(base_url: Option<String>, period: Period) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| BINANCE_VISION.to_string()),
            period,
        }
    }

    fn plan(&self, window: &FetchWindow) -> ArchivePlan {
        let symbol = &window.instrument_id;
        let interval = self.period.as_str();
        ArchivePlan::daily(window, |date| {
            format!(
                "{}/data/spot/daily/klines/{symbol}/{interval}/{symbol}-{interval}-{}.zip",
                self.base_url,
                date.format("%Y-%m-%d")
            )
        })
    }

    fn parse_row(row: &csv::StringRecord) -> Result<TimePoint> {
        let record = Value::Array(row.iter().map(|f| Value::String(f.to_string())).collect());
        let timestamp = record
            .get(0)
            .and_then(i64_from_json)
            .and_then(from_epoch_auto)
            .ok_or_else(|| ErrorKind::malformed(format!("archive row without open time: {row:?}")))?;

        RecordBuilder::new(&record, timestamp)
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
impl SourceAdapter for BinanceArchive {
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
        NaiveDate::from_ymd_opt(2017, 8, 17).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::Archive
    }

    /// Minimum archive files per page.
    fn page_size(&self) -> usize {
        MIN_FILES_PER_PAGE
    }

    fn period(&self) -> Period {
        self.period
    }

    /// Fetches the next batch of daily files, batches being sized so the
    /// whole window fits the page budget. Missing days are skipped.
    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let plan = self.plan(window);
        let first = ArchivePlan::position(window.cursor);
        if plan.get(first).is_none() {
            return Ok(Payload::Empty);
        }

        let per_page = window.items_per_page(plan.files().len(), MIN_FILES_PER_PAGE);
        let last = (first + per_page).min(plan.files().len()) - 1;
        let mut files = Vec::with_capacity(last + 1 - first);
        for file in &plan.files()[first..=last] {
            match fetcher.fetch_bytes(&Request::get(&file.url)).await {
                Ok(bytes) => files.push(bytes),
                Err(ErrorKind::ClientError { status: 404, .. }) => {
                    debug!(
                        source = SOURCE_ID,
                        instrument = %window.instrument_id,
                        date = %file.date,
                        "Archive missing, skipping day"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Payload::Archive { last, files })
    }

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Archive { last, files } = payload else {
            return Ok(Page::empty());
        };

        let mut records = Vec::new();
        for bytes in &files {
            let rows = extract_csv_rows(bytes)?;
            records.extend(rows.iter().map(Self::parse_row));
        }
        Ok(Page::new(records, self.plan(window).next(last)))
    }
}

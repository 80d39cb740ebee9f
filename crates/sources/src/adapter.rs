//! The source adapter interface and the pagination driver.

use async_trait::async_trait;
use backfill_core::{
    Cursor, ErrorKind, FetchWindow, Period, Result, Series, SeriesKind, SeriesMeta, TimePoint,
};
use backfill_data::collect_records;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fetcher::ResilientFetcher;

/// Raw response of one page fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Bytes(Vec<u8>),
    /// Archives of one batch of files, `last` being the final index the
    /// batch covered whether or not that file existed
    Archive { last: usize, files: Vec<Vec<u8>> },
    /// Nothing available for the requested page
    Empty,
}

/// Normalized records of one page and where to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Result<TimePoint>>,
    pub next: Cursor,
}

impl Page {
    /// A page with no records that ends the window.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            next: Cursor::Done,
        }
    }

    #[must_use]
    pub fn new(records: Vec<Result<TimePoint>>, next: Cursor) -> Self {
        Self { records, next }
    }
}

/// Pagination idiom used by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    BackwardCursor,
    ForwardChunks,
    BlockSearch,
    Archive,
}

impl Pagination {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Pagination::BackwardCursor => "backward_cursor",
            Pagination::ForwardChunks => "forward_chunks",
            Pagination::BlockSearch => "block_search",
            Pagination::Archive => "archive",
        }
    }
}

impl fmt::Display for Pagination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external data source.
///
/// Implementations supply request construction (`fetch_page`) and payload
/// normalization (`parse_page`); [`drain`] owns the paging loop.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SeriesKind;

    fn unit(&self) -> &str;

    /// Earliest date the source has data for.
    fn min_start_date(&self) -> NaiveDate;

    fn pagination(&self) -> Pagination;

    /// Records requested per page.
    fn page_size(&self) -> usize;

    /// Native spacing of the series this source produces.
    fn period(&self) -> Period;

    fn initial_cursor(&self, _window: &FetchWindow) -> Cursor {
        Cursor::Start
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload>;

    fn parse_page(&self, window: &FetchWindow, payload: Payload) -> Result<Page>;

    fn meta(&self, instrument_id: &str) -> SeriesMeta {
        SeriesMeta::new(self.source_id(), instrument_id, self.unit(), self.kind())
    }
}

/// Limits applied by [`drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    pub max_pages: usize,
    pub pacing: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            pacing: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrainOutcome {
    pub series: Series,
    pub pages: usize,
    pub malformed: usize,
}

/// Whether `next` moves forward from `previous` to a position still inside
/// `window`, so an empty page there is a hole in the data rather than the
/// end of it.
fn skips_ahead(previous: Cursor, next: Cursor, window: &FetchWindow) -> bool {
    match (previous, next) {
        (Cursor::Start, Cursor::Timestamp(t)) => window.contains(t),
        (Cursor::Timestamp(p), Cursor::Timestamp(t)) => t > p && window.contains(t),
        (Cursor::Start, Cursor::Archive(_)) => true,
        (Cursor::Archive(p), Cursor::Archive(i)) => i > p,
        _ => false,
    }
}

/// Pages through `window` until the adapter is exhausted.
///
/// Stops when the cursor is `Done`, when a page yields no new in-range
/// records without moving forward within the window, or when the cursor
/// fails to advance. Output is deduplicated by timestamp and restricted to
/// the window.
///
/// # Errors
/// - `TooManyPages` when more than `config.max_pages` pages would be needed
/// - `Cancelled` if shutdown fires between pages
/// - any terminal fetch or parse error
pub async fn drain(
    adapter: &dyn SourceAdapter,
    fetcher: &ResilientFetcher,
    window: &mut FetchWindow,
    config: &DrainConfig,
) -> Result<DrainOutcome> {
    let shutdown = fetcher.shutdown().clone();
    let mut seen: HashSet<DateTime<Utc>> = HashSet::new();
    let mut points: Vec<TimePoint> = Vec::new();
    let mut malformed = 0usize;

    window.page_budget = config.max_pages;
    window.cursor = adapter.initial_cursor(window);

    while !window.cursor.is_done() {
        if shutdown.is_triggered() {
            return Err(ErrorKind::Cancelled);
        }
        if window.pages_fetched >= config.max_pages {
            warn!(
                source = %window.source_id,
                instrument = %window.instrument_id,
                cap = config.max_pages,
                "Page cap reached"
            );
            return Err(ErrorKind::TooManyPages {
                cap: config.max_pages,
            });
        }
        if window.pages_fetched > 0 && !config.pacing.is_zero() {
            tokio::select! {
                () = shutdown.wait() => return Err(ErrorKind::Cancelled),
                () = tokio::time::sleep(config.pacing) => {}
            }
        }

        let payload = adapter.fetch_page(fetcher, window).await?;
        let page = adapter.parse_page(window, payload)?;

        let context = format!("{}/{}", window.source_id, window.instrument_id);
        let collected = collect_records(page.records, &context);
        malformed += collected.malformed;

        let mut new_in_range = 0usize;
        for point in collected.points {
            if !window.contains(point.timestamp) {
                continue;
            }
            if seen.insert(point.timestamp) {
                new_in_range += 1;
            }
            points.push(point);
        }

        let previous = window.cursor;
        window.advance(page.next);

        debug!(
            source = %window.source_id,
            instrument = %window.instrument_id,
            page = window.pages_fetched,
            new_records = new_in_range,
            cursor = ?window.cursor,
            "Page processed"
        );

        if window.cursor.is_done() {
            break;
        }
        if new_in_range == 0 {
            if skips_ahead(previous, window.cursor, window) {
                debug!(
                    source = %window.source_id,
                    instrument = %window.instrument_id,
                    cursor = ?window.cursor,
                    "Empty chunk, continuing"
                );
                continue;
            }
            debug!(
                source = %window.source_id,
                instrument = %window.instrument_id,
                "Page had no new records, stopping"
            );
            break;
        }
        if window.cursor == previous {
            warn!(
                source = %window.source_id,
                instrument = %window.instrument_id,
                cursor = ?window.cursor,
                "Cursor did not advance, stopping"
            );
            break;
        }
    }

    let series = Series::from_points(adapter.meta(&window.instrument_id), points);
    info!(
        source = %window.source_id,
        instrument = %window.instrument_id,
        pages = window.pages_fetched,
        records = series.len(),
        malformed = malformed,
        "Window drained"
    );

    Ok(DrainOutcome {
        series,
        pages: window.pages_fetched,
        malformed,
    })
}

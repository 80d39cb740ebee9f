//! Fetch windows and pagination cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a pagination driver within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cursor {
    /// Nothing fetched yet
    Start,
    /// Timestamp bound (a `before` for backward paging, a chunk start for forward)
    Timestamp(DateTime<Utc>),
    /// Record offset
    Offset(u64),
    /// Block number
    Block(u64),
    /// Index into an archive file list
    Archive(usize),
    /// Window fully drained
    Done,
}

impl Cursor {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Cursor::Done)
    }
}

/// The slice of work one job asks of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub source_id: String,
    pub instrument_id: String,
    /// Inclusive start, already clamped to the source's availability floor
    pub start: DateTime<Utc>,
    /// Inclusive end
    pub end: DateTime<Utc>,
    pub page_size: usize,
    pub cursor: Cursor,
    pub pages_fetched: usize,
    /// Pages the driver will spend on this window before giving up
    pub page_budget: usize,
}

/// Page budget of a window nobody has configured.
pub const DEFAULT_PAGE_BUDGET: usize = 100;

impl FetchWindow {
    /// Creates a window positioned at [`Cursor::Start`].
    pub fn new(
        source_id: impl Into<String>,
        instrument_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            start,
            end,
            page_size,
            cursor: Cursor::Start,
            pages_fetched: 0,
            page_budget: DEFAULT_PAGE_BUDGET,
        }
    }

    /// Items one page has to cover so that `total` items fit the page
    /// budget, never fewer than `floor`.
    #[must_use]
    pub fn items_per_page(&self, total: usize, floor: usize) -> usize {
        total
            .div_ceil(self.page_budget.max(1))
            .max(floor)
            .max(1)
    }

    /// Returns true if `ts` lies within `[start, end]`.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Returns true if the window covers no time at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Moves the window to `next` and counts one page.
    pub fn advance(&mut self, next: Cursor) {
        self.cursor = next;
        self.pages_fetched += 1;
    }
}
